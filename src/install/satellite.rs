// src/install/satellite.rs

//! Satellite (localization) packages
//!
//! A satellite is installed like any package, then the culture-specific
//! part of its `lib` folder is copied into the runtime package it augments.
//! Files already present in the runtime package are never overwritten, and
//! nothing outside `lib/**/<culture>/` is copied.

use super::scope::OperationScope;
use crate::error::Result;
use crate::packages::manifest::{PackageHandle, is_culture_file};
use crate::packages::traits::PackageExtractor;
use crate::repository::LocalPackageRepository;
use semver::Version;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Install a satellite and merge its culture files into the runtime package
///
/// Returns whether anything was written.
pub fn install_satellite(
    scope: &mut OperationScope,
    extractor: &dyn PackageExtractor,
    local: &LocalPackageRepository,
    package: &PackageHandle,
    runtime_id: &str,
    runtime_version: &Version,
) -> Result<bool> {
    let target = local.package_dir(package.id(), package.version());
    let extraction = extractor.extract(package, &target)?;
    if !extraction.already_present {
        scope.track_dir(target.clone());
    }
    scope.record_package(package, &target, &extraction, true)?;

    let runtime_dir = local.package_dir(runtime_id, runtime_version);
    if !local.is_present(runtime_id, runtime_version) {
        warn!(
            "Runtime package {} {} for satellite {} is not installed; nothing merged",
            runtime_id, runtime_version, package
        );
        return Ok(!extraction.already_present);
    }

    let language = package.manifest.language.as_deref().unwrap_or_default();
    let mut copied = 0usize;
    for relative in relative_files(&target)? {
        if !is_culture_file(&relative, language) {
            continue;
        }

        let dest = runtime_dir.join(&relative);
        if dest.exists() {
            debug!("Keeping existing {}", dest.display());
            continue;
        }

        if let Some(parent) = dest.parent() {
            if let Some(first_missing) = first_missing_ancestor(parent, &runtime_dir) {
                fs::create_dir_all(parent)?;
                scope.track_dir(first_missing);
            }
        }

        fs::copy(target.join(&relative), &dest)?;
        scope.track_file(dest);
        copied += 1;
    }

    info!(
        "Merged {} culture files from {} into {} {}",
        copied, package, runtime_id, runtime_version
    );
    Ok(!extraction.already_present || copied > 0)
}

/// Outermost directory between `stop` and `dir` that does not exist yet
fn first_missing_ancestor(dir: &Path, stop: &Path) -> Option<PathBuf> {
    let mut missing = None;
    let mut current = Some(dir);
    while let Some(path) = current {
        if path == stop || path.exists() {
            break;
        }
        missing = Some(path.to_path_buf());
        current = path.parent();
    }
    missing
}

/// Files under `dir` as `/`-separated relative paths
fn relative_files(dir: &Path) -> Result<Vec<String>> {
    let mut files = Vec::new();
    let mut pending = vec![(dir.to_path_buf(), String::new())];

    while let Some((path, prefix)) = pending.pop() {
        for entry in fs::read_dir(&path)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let relative = if prefix.is_empty() {
                name
            } else {
                format!("{}/{}", prefix, name)
            };

            if entry.file_type()?.is_dir() {
                pending.push((entry.path(), relative));
            } else {
                files.push(relative);
            }
        }
    }

    files.sort();
    Ok(files)
}
