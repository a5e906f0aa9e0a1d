// src/error.rs

use std::path::PathBuf;
use thiserror::Error;

/// Core error types for Stowage
#[derive(Error, Debug)]
pub enum Error {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// XML read/write errors outside of a configuration layer
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// JSON errors (manifests, remote indexes)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Local repository record not found
    #[error("Database not found at path: {0}")]
    DatabaseNotFound(String),

    /// Local repository record initialization error
    #[error("Failed to initialize database: {0}")]
    InitError(String),

    /// A configuration file could not be parsed
    #[error("Failed to parse configuration file {path}: {message}")]
    ConfigurationParse { path: PathBuf, message: String },

    /// A write reached a chain with no writable layer
    #[error("No writable configuration file is available")]
    NoWritableConfiguration,

    /// Empty section, key or name argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A repository could not be constructed for a package source
    #[error("Unable to create repository for source '{source_name}': {message}")]
    SourceConstruction { source_name: String, message: String },

    /// Restore attempted while consent is required but not granted
    #[error(
        "Package restore consent is required but has not been granted. \
         Set packageRestore/enabled to true or STOWAGE_ENABLE_PACKAGE_RESTORE=true"
    )]
    ConsentRequired,

    /// A package or one of its dependencies cannot be satisfied
    #[error("Unable to resolve dependency: {0}")]
    DependencyResolution(String),

    /// Package does not support the requested target framework
    #[error("Package {id} {version} does not support target framework '{framework}'")]
    IncompatibleFramework {
        id: String,
        version: String,
        framework: String,
    },

    /// Package requires a newer client
    #[error("Package {id} requires client version {required} or newer (running {current})")]
    MinClientVersion {
        id: String,
        required: String,
        current: String,
    },

    /// Package not found in any repository
    #[error("Unable to find package '{0}'")]
    PackageNotFound(String),

    /// Malformed package or reference manifest
    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    /// Uninstall refused because other packages depend on the package
    #[error("Unable to uninstall '{id}' because {dependents} depend(s) on it")]
    PackageInUse { id: String, dependents: String },

    /// Download error
    #[error("Download failed: {0}")]
    DownloadError(String),

    /// Checksum mismatch
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// Credential encryption/decryption error
    #[error("Credential error: {0}")]
    Credential(String),
}

/// Result type alias using Stowage's Error type
pub type Result<T> = std::result::Result<T, Error>;
