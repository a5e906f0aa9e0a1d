// src/lib.rs

//! Stowage Package Client
//!
//! Resolves named, versioned packages against layered configuration and one
//! or more package sources, then installs them transactionally.
//!
//! # Architecture
//!
//! - `config`: cascade of configuration files loaded from the filesystem root
//!   down to the working directory; for single values the root file has the
//!   final say
//! - `sources`: named package sources with enablement and credentials
//! - `repository`: folder and HTTP repositories, aggregated into one view
//! - `install`: single installs and manifest restores under operation scopes
//! - `db`: SQLite record of installed packages and the operation journal

pub mod config;
pub mod db;
mod error;
pub mod install;
pub mod packages;
pub mod repository;
pub mod sources;

pub use error::{Error, Result};
