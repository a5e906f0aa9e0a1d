// src/packages/traits.rs

//! Common traits for package extraction

use super::manifest::PackageHandle;
use crate::error::Result;
use std::path::Path;

/// Metadata about a file written into an install directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageFile {
    /// Path relative to the package directory, `/`-separated
    pub path: String,
    pub size: i64,
    pub sha256: String,
}

/// Result of extracting one package
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub files: Vec<PackageFile>,
    /// The target directory was already fully written (by us or another process)
    pub already_present: bool,
}

/// Unpacks a package into its versioned install directory
///
/// Implementations must be idempotent: a target directory that already holds
/// a complete package is success, and a partially written directory must
/// never become visible at `target`.
pub trait PackageExtractor: Send + Sync {
    fn extract(&self, package: &PackageHandle, target: &Path) -> Result<Extraction>;
}
