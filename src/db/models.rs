// src/db/models.rs

//! Data models for the local repository record
//!
//! This module defines Rust structs that correspond to database tables
//! and provides methods for creating, reading, updating, and deleting records.

use crate::error::{Error, Result};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::str::FromStr;

fn invalid_column(index: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        index,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

/// What an operation did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Install,
    Restore,
    Uninstall,
}

impl OperationKind {
    pub fn as_str(&self) -> &str {
        match self {
            OperationKind::Install => "install",
            OperationKind::Restore => "restore",
            OperationKind::Uninstall => "uninstall",
        }
    }
}

impl FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "install" => Ok(OperationKind::Install),
            "restore" => Ok(OperationKind::Restore),
            "uninstall" => Ok(OperationKind::Uninstall),
            _ => Err(format!("Invalid operation kind: {}", s)),
        }
    }
}

/// Operation status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    Pending,
    Applied,
    RolledBack,
}

impl OperationStatus {
    pub fn as_str(&self) -> &str {
        match self {
            OperationStatus::Pending => "pending",
            OperationStatus::Applied => "applied",
            OperationStatus::RolledBack => "rolled_back",
        }
    }
}

impl FromStr for OperationStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OperationStatus::Pending),
            "applied" => Ok(OperationStatus::Applied),
            "rolled_back" => Ok(OperationStatus::RolledBack),
            _ => Err(format!("Invalid operation status: {}", s)),
        }
    }
}

/// One install, restore or uninstall against an install root
#[derive(Debug, Clone)]
pub struct Operation {
    pub id: Option<i64>,
    pub kind: OperationKind,
    pub description: String,
    pub status: OperationStatus,
    pub created_at: Option<String>,
    pub applied_at: Option<String>,
    pub rolled_back_at: Option<String>,
}

impl Operation {
    pub fn new(kind: OperationKind, description: String) -> Self {
        Self {
            id: None,
            kind,
            description,
            status: OperationStatus::Pending,
            created_at: None,
            applied_at: None,
            rolled_back_at: None,
        }
    }

    /// Insert this operation into the database
    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO operations (kind, description, status) VALUES (?1, ?2, ?3)",
            params![self.kind.as_str(), &self.description, self.status.as_str()],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, kind, description, status, created_at, applied_at, rolled_back_at
             FROM operations WHERE id = ?1",
        )?;

        let operation = stmt.query_row([id], Self::from_row).optional()?;

        Ok(operation)
    }

    /// List all operations, newest first
    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, kind, description, status, created_at, applied_at, rolled_back_at
             FROM operations ORDER BY id DESC",
        )?;

        let operations = stmt
            .query_map([], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(operations)
    }

    /// Update operation status, stamping the matching timestamp
    pub fn update_status(&mut self, conn: &Connection, new_status: OperationStatus) -> Result<()> {
        let id = self
            .id
            .ok_or_else(|| Error::InitError("Cannot update operation without ID".to_string()))?;

        let timestamp_field = match new_status {
            OperationStatus::Applied => Some("applied_at"),
            OperationStatus::RolledBack => Some("rolled_back_at"),
            OperationStatus::Pending => None,
        };

        match timestamp_field {
            Some(field) => conn.execute(
                &format!(
                    "UPDATE operations SET status = ?1, {} = CURRENT_TIMESTAMP WHERE id = ?2",
                    field
                ),
                params![new_status.as_str(), id],
            )?,
            None => conn.execute(
                "UPDATE operations SET status = ?1 WHERE id = ?2",
                params![new_status.as_str(), id],
            )?,
        };

        self.status = new_status;
        Ok(())
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let kind_str: String = row.get(1)?;
        let kind = kind_str.parse::<OperationKind>().map_err(|e| invalid_column(1, e))?;
        let status_str: String = row.get(3)?;
        let status = status_str
            .parse::<OperationStatus>()
            .map_err(|e| invalid_column(3, e))?;

        Ok(Self {
            id: Some(row.get(0)?),
            kind,
            description: row.get(2)?,
            status,
            created_at: row.get(4)?,
            applied_at: row.get(5)?,
            rolled_back_at: row.get(6)?,
        })
    }
}

const PACKAGE_COLUMNS: &str =
    "id, package_id, version, install_path, source, is_satellite, installed_at, installed_by_operation_id";

/// A package present in the install root
#[derive(Debug, Clone)]
pub struct InstalledPackage {
    pub id: Option<i64>,
    pub package_id: String,
    pub version: String,
    pub install_path: String,
    pub source: Option<String>,
    pub is_satellite: bool,
    pub installed_at: Option<String>,
    pub installed_by_operation_id: Option<i64>,
}

impl InstalledPackage {
    pub fn new(package_id: String, version: String, install_path: String) -> Self {
        Self {
            id: None,
            package_id,
            version,
            install_path,
            source: None,
            is_satellite: false,
            installed_at: None,
            installed_by_operation_id: None,
        }
    }

    /// Insert this package into the database
    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO packages (package_id, version, install_path, source, is_satellite, installed_by_operation_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                &self.package_id,
                &self.version,
                &self.install_path,
                &self.source,
                self.is_satellite,
                &self.installed_by_operation_id,
            ],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    /// Insert unless the same identity is already recorded
    ///
    /// Returns `None` when another writer got there first.
    pub fn insert_or_ignore(&mut self, conn: &Connection) -> Result<Option<i64>> {
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO packages (package_id, version, install_path, source, is_satellite, installed_by_operation_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                &self.package_id,
                &self.version,
                &self.install_path,
                &self.source,
                self.is_satellite,
                &self.installed_by_operation_id,
            ],
        )?;

        if inserted == 0 {
            return Ok(None);
        }

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(Some(id))
    }

    pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM packages WHERE id = ?1",
            PACKAGE_COLUMNS
        ))?;

        let package = stmt.query_row([id], Self::from_row).optional()?;

        Ok(package)
    }

    /// Find every installed version of a package id
    pub fn find_by_package_id(conn: &Connection, package_id: &str) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM packages WHERE package_id = ?1 ORDER BY id",
            PACKAGE_COLUMNS
        ))?;

        let packages = stmt
            .query_map([package_id], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(packages)
    }

    /// Find one exact identity
    pub fn find(conn: &Connection, package_id: &str, version: &str) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM packages WHERE package_id = ?1 AND version = ?2",
            PACKAGE_COLUMNS
        ))?;

        let package = stmt
            .query_row([package_id, version], Self::from_row)
            .optional()?;

        Ok(package)
    }

    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM packages ORDER BY package_id, version",
            PACKAGE_COLUMNS
        ))?;

        let packages = stmt
            .query_map([], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(packages)
    }

    /// Delete a package by row ID (files and dependencies cascade)
    pub fn delete(conn: &Connection, id: i64) -> Result<()> {
        conn.execute("DELETE FROM packages WHERE id = ?1", [id])?;
        Ok(())
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: Some(row.get(0)?),
            package_id: row.get(1)?,
            version: row.get(2)?,
            install_path: row.get(3)?,
            source: row.get(4)?,
            is_satellite: row.get(5)?,
            installed_at: row.get(6)?,
            installed_by_operation_id: row.get(7)?,
        })
    }
}

/// A file extracted for an installed package
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub id: Option<i64>,
    pub path: String,
    pub sha256_hash: String,
    pub size: i64,
    pub package_row_id: i64,
}

impl FileEntry {
    pub fn new(path: String, sha256_hash: String, size: i64, package_row_id: i64) -> Self {
        Self {
            id: None,
            path,
            sha256_hash,
            size,
            package_row_id,
        }
    }

    /// Insert this file into the database
    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO files (path, sha256_hash, size, package_row_id) VALUES (?1, ?2, ?3, ?4)",
            params![&self.path, &self.sha256_hash, &self.size, &self.package_row_id],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    /// Find all files belonging to a package
    pub fn find_by_package(conn: &Connection, package_row_id: i64) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, path, sha256_hash, size, package_row_id
             FROM files WHERE package_row_id = ?1 ORDER BY path",
        )?;

        let files = stmt
            .query_map([package_row_id], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(files)
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: Some(row.get(0)?),
            path: row.get(1)?,
            sha256_hash: row.get(2)?,
            size: row.get(3)?,
            package_row_id: row.get(4)?,
        })
    }
}

/// A declared dependency of an installed package
#[derive(Debug, Clone)]
pub struct DependencyEntry {
    pub id: Option<i64>,
    pub package_row_id: i64,
    pub depends_on_id: String,
    pub version_constraint: String,
}

impl DependencyEntry {
    pub fn new(package_row_id: i64, depends_on_id: String, version_constraint: String) -> Self {
        Self {
            id: None,
            package_row_id,
            depends_on_id,
            version_constraint,
        }
    }

    /// Insert this dependency into the database
    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO dependencies (package_row_id, depends_on_id, version_constraint)
             VALUES (?1, ?2, ?3)",
            params![&self.package_row_id, &self.depends_on_id, &self.version_constraint],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    /// Dependencies declared by one installed package
    pub fn find_by_package(conn: &Connection, package_row_id: i64) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, package_row_id, depends_on_id, version_constraint
             FROM dependencies WHERE package_row_id = ?1",
        )?;

        let dependencies = stmt
            .query_map([package_row_id], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(dependencies)
    }

    /// Installed packages that declare a dependency on `package_id`
    pub fn find_dependents(conn: &Connection, package_id: &str) -> Result<Vec<InstalledPackage>> {
        let mut stmt = conn.prepare(
            "SELECT DISTINCT p.id, p.package_id, p.version, p.install_path, p.source, p.is_satellite,
                    p.installed_at, p.installed_by_operation_id
             FROM packages p
             INNER JOIN dependencies d ON d.package_row_id = p.id
             WHERE d.depends_on_id = ?1
             ORDER BY p.package_id",
        )?;

        let packages = stmt
            .query_map([package_id], InstalledPackage::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(packages)
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: Some(row.get(0)?),
            package_row_id: row.get(1)?,
            depends_on_id: row.get(2)?,
            version_constraint: row.get(3)?,
        })
    }
}
