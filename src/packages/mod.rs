// src/packages/mod.rs

//! Package format support
//!
//! This module provides the package manifest model, the default tar.gz
//! archive reader and builder, and the `PackageExtractor` seam installs go
//! through.

pub mod archive;
pub mod manifest;
pub mod traits;

pub use archive::{ArchiveBuilder, ArchiveExtractor};
pub use manifest::{PackageDependency, PackageHandle, PackageManifest};
pub use traits::{Extraction, PackageExtractor, PackageFile};
