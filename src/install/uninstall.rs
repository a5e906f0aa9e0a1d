// src/install/uninstall.rs

//! Removing installed packages
//!
//! Used by exclusive-mode upgrades. A package another installed package
//! still depends on is refused. Dependencies left without dependents are
//! removed too. Directories that cannot be deleted (files in use) stay in
//! place with a warning.

use super::scope::OperationScope;
use crate::db::models::{DependencyEntry, InstalledPackage};
use crate::error::{Error, Result};
use crate::packages::archive::read_installed_manifest;
use crate::repository::{LocalPackageRepository, satisfies};
use semver::Version;
use std::fs;
use tracing::{info, warn};

/// Uninstall `id` at `version`, returning the removed packages as `id version`
pub fn uninstall(
    scope: &mut OperationScope,
    local: &LocalPackageRepository,
    id: &str,
    version: &Version,
    remove_dependencies: bool,
) -> Result<Vec<String>> {
    let dependents = present_dependents(scope, local, id)?;
    if !dependents.is_empty() {
        return Err(Error::PackageInUse {
            id: id.to_string(),
            dependents: dependents.join(", "),
        });
    }

    let mut removed = Vec::new();
    remove_one(scope, local, id, version, remove_dependencies, &mut removed)?;
    Ok(removed)
}

fn remove_one(
    scope: &mut OperationScope,
    local: &LocalPackageRepository,
    id: &str,
    version: &Version,
    remove_dependencies: bool,
    removed: &mut Vec<String>,
) -> Result<()> {
    let dir = local.package_dir(id, version);
    let dependencies = match read_installed_manifest(&dir) {
        Ok(manifest) => manifest.dependencies,
        Err(e) => {
            warn!("Unable to read manifest of {} {}: {}", id, version, e);
            Vec::new()
        }
    };

    if let Some(record) = InstalledPackage::find(scope.conn(), id, &version.to_string())? {
        if let Some(row) = record.id {
            InstalledPackage::delete(scope.conn(), row)?;
        }
    }

    match fs::remove_dir_all(&dir) {
        Ok(()) => info!("Removed {} {}", id, version),
        Err(e) => warn!("Unable to delete {}: {}; leaving it in place", dir.display(), e),
    }
    removed.push(format!("{} {}", id, version));

    if !remove_dependencies {
        return Ok(());
    }

    for dependency in dependencies {
        if !present_dependents(scope, local, &dependency.id)?.is_empty() {
            continue;
        }
        for (manifest, _) in local.find_installed(&dependency.id)? {
            if satisfies(&dependency.version, &manifest.version, true) {
                remove_one(scope, local, &manifest.id, &manifest.version, true, removed)?;
            }
        }
    }
    Ok(())
}

/// Installed packages, still present on disk, that depend on `id`
fn present_dependents(
    scope: &OperationScope,
    local: &LocalPackageRepository,
    id: &str,
) -> Result<Vec<String>> {
    let mut dependents = Vec::new();
    for package in DependencyEntry::find_dependents(scope.conn(), id)? {
        let Ok(version) = Version::parse(&package.version) else {
            continue;
        };
        if local.exists(&package.package_id, Some(&version))? {
            dependents.push(format!("{} {}", package.package_id, package.version));
        }
    }
    Ok(dependents)
}
