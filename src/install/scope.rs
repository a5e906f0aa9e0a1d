// src/install/scope.rs

//! Operation scopes
//!
//! A scope journals one install or restore as an `operations` row and
//! remembers everything it writes: extracted package directories, files
//! copied into other packages, and package records. When the body fails the
//! scope removes all of it and marks the operation `rolled_back`, so a failed
//! install never leaves a half-installed package behind. Packages that were
//! present before the scope began are never touched.

use crate::db::{
    self,
    models::{DependencyEntry, FileEntry, InstalledPackage, Operation, OperationKind, OperationStatus},
};
use crate::error::Result;
use crate::packages::manifest::PackageHandle;
use crate::packages::traits::Extraction;
use crate::repository::satisfies;
use rusqlite::Connection;
use semver::{Version, VersionReq};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub struct OperationScope {
    conn: Connection,
    operation: Operation,
    created_dirs: Vec<PathBuf>,
    created_files: Vec<PathBuf>,
    package_rows: Vec<i64>,
}

/// Run `body` inside a new scope over the install root
///
/// The body's error is returned unchanged after the rollback.
pub fn run<T, F>(install_root: &Path, kind: OperationKind, description: &str, body: F) -> Result<T>
where
    F: FnOnce(&mut OperationScope) -> Result<T>,
{
    let mut scope = OperationScope::begin(install_root, kind, description)?;
    match body(&mut scope) {
        Ok(value) => {
            scope.commit()?;
            Ok(value)
        }
        Err(e) => {
            warn!("{} failed, rolling back: {}", description, e);
            scope.rollback();
            Err(e)
        }
    }
}

impl OperationScope {
    fn begin(install_root: &Path, kind: OperationKind, description: &str) -> Result<Self> {
        let conn = db::open_for_root(install_root)?;
        let mut operation = Operation::new(kind, description.to_string());
        operation.insert(&conn)?;
        debug!("Operation {:?} started: {}", operation.id, description);

        Ok(Self {
            conn,
            operation,
            created_dirs: Vec::new(),
            created_files: Vec::new(),
            package_rows: Vec::new(),
        })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run a last check while holding the database write lock
    ///
    /// Rollbacks remove their directories under the same lock, so the check
    /// sees the install root either before or after a concurrent rollback.
    pub fn confirm<F>(&mut self, check: F) -> Result<()>
    where
        F: FnOnce() -> Result<()>,
    {
        db::transaction(&mut self.conn, |_| check())
    }

    /// A directory this scope created and must remove on failure
    pub fn track_dir(&mut self, path: PathBuf) {
        self.created_dirs.push(path);
    }

    /// A file this scope created and must remove on failure
    pub fn track_file(&mut self, path: PathBuf) {
        self.created_files.push(path);
    }

    /// Record an installed package with its files and dependencies
    ///
    /// Returns `None` when the package was already recorded (for example by
    /// another process that extracted it first).
    pub fn record_package(
        &mut self,
        package: &PackageHandle,
        install_path: &Path,
        extraction: &Extraction,
        is_satellite: bool,
    ) -> Result<Option<i64>> {
        let operation_id = self.operation.id;
        let row = db::transaction(&mut self.conn, |tx| {
            let mut record = InstalledPackage::new(
                package.id().to_string(),
                package.version().to_string(),
                install_path.to_string_lossy().into_owned(),
            );
            record.source = Some(package.source.clone());
            record.is_satellite = is_satellite;
            record.installed_by_operation_id = operation_id;

            let Some(row) = record.insert_or_ignore(tx)? else {
                return Ok(None);
            };

            for file in &extraction.files {
                FileEntry::new(file.path.clone(), file.sha256.clone(), file.size, row).insert(tx)?;
            }
            for dependency in &package.manifest.dependencies {
                DependencyEntry::new(row, dependency.id.clone(), dependency.version.to_string())
                    .insert(tx)?;
            }
            Ok(Some(row))
        })?;

        if let Some(row) = row {
            self.package_rows.push(row);
        }
        Ok(row)
    }

    fn commit(mut self) -> Result<()> {
        self.operation.update_status(&self.conn, OperationStatus::Applied)?;
        info!(
            "Operation {} applied ({} packages)",
            self.operation.description,
            self.package_rows.len()
        );
        Ok(())
    }

    /// Undo everything this scope wrote; failures are logged, not returned
    ///
    /// A package another operation already depends on is kept, along with
    /// its directory.
    fn rollback(mut self) {
        for file in self.created_files.iter().rev() {
            if let Err(e) = fs::remove_file(file) {
                warn!("Failed to remove {} during rollback: {}", file.display(), e);
            }
        }

        let rows = std::mem::take(&mut self.package_rows);
        let dirs = std::mem::take(&mut self.created_dirs);
        let undone = db::transaction(&mut self.conn, |tx| {
            let mut kept = Vec::new();
            for row in &rows {
                let Some(package) = InstalledPackage::find_by_id(tx, *row)? else {
                    continue;
                };
                if relied_on_elsewhere(tx, &package, self.operation.id, &rows)? {
                    info!(
                        "Keeping {} {}: another operation depends on it",
                        package.package_id, package.version
                    );
                    kept.push(PathBuf::from(&package.install_path));
                    continue;
                }
                InstalledPackage::delete(tx, *row)?;
            }
            remove_dirs(&dirs, &kept);
            Ok(())
        });
        if let Err(e) = undone {
            warn!("Failed to remove package records during rollback: {}", e);
            remove_dirs(&dirs, &[]);
        }

        if let Err(e) = self.operation.update_status(&self.conn, OperationStatus::RolledBack) {
            warn!("Failed to mark operation rolled back: {}", e);
        }
        info!("Operation {} rolled back", self.operation.description);
    }
}

/// Whether an operation that began after `operation_id` recorded a package
/// whose dependency `package` satisfies
fn relied_on_elsewhere(
    conn: &Connection,
    package: &InstalledPackage,
    operation_id: Option<i64>,
    own_rows: &[i64],
) -> Result<bool> {
    let Ok(version) = Version::parse(&package.version) else {
        return Ok(false);
    };

    for dependent in DependencyEntry::find_dependents(conn, &package.package_id)? {
        let Some(row) = dependent.id else { continue };
        if own_rows.contains(&row) || dependent.installed_by_operation_id <= operation_id {
            continue;
        }
        let relies = DependencyEntry::find_by_package(conn, row)?.iter().any(|entry| {
            entry.depends_on_id.eq_ignore_ascii_case(&package.package_id)
                && VersionReq::parse(&entry.version_constraint)
                    .is_ok_and(|req| satisfies(&req, &version, true))
        });
        if relies {
            return Ok(true);
        }
    }
    Ok(false)
}

fn remove_dirs(dirs: &[PathBuf], kept: &[PathBuf]) {
    for dir in dirs.iter().rev().filter(|dir| !kept.contains(*dir)) {
        if let Err(e) = fs::remove_dir_all(dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove {} during rollback: {}", dir.display(), e);
            }
        }
    }
}
