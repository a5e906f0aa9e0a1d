// src/db/schema.rs

//! Database schema definitions and migrations
//!
//! This module defines the SQLite schema of the local repository record and
//! provides a migration system to evolve it over time.

use crate::error::{Error, Result};
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// Initialize the schema version tracking table
fn init_schema_version(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    init_schema_version(conn)?;

    let version = conn
        .query_row(
            "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    Ok(version)
}

/// Set the schema version
fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    Ok(())
}

/// Apply all pending migrations to bring the database up to date
pub fn migrate(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;
    debug!("Current schema version: {}", current_version);

    if current_version >= SCHEMA_VERSION {
        return Ok(());
    }

    for version in (current_version + 1)..=SCHEMA_VERSION {
        info!("Applying migration to version {}", version);
        apply_migration(conn, version)?;
        set_schema_version(conn, version)?;
    }

    info!("Schema migration complete. Now at version {}", SCHEMA_VERSION);
    Ok(())
}

/// Apply a specific migration version
fn apply_migration(conn: &Connection, version: i32) -> Result<()> {
    match version {
        1 => migrate_v1(conn),
        2 => migrate_v2(conn),
        _ => Err(Error::InitError(format!("Unknown migration version: {}", version))),
    }
}

/// Initial schema - Version 1
///
/// - operations: install/restore/uninstall history with rollback status
/// - packages: installed package identities and their directories
/// - files: files extracted for each package, with hashes
/// - dependencies: declared dependencies of installed packages
fn migrate_v1(conn: &Connection) -> Result<()> {
    debug!("Creating schema version 1");

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS operations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            kind TEXT NOT NULL CHECK(kind IN ('install', 'restore', 'uninstall')),
            description TEXT NOT NULL,
            status TEXT NOT NULL CHECK(status IN ('pending', 'applied', 'rolled_back')),
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            applied_at TEXT,
            rolled_back_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_operations_status ON operations(status);

        CREATE TABLE IF NOT EXISTS packages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            package_id TEXT NOT NULL COLLATE NOCASE,
            version TEXT NOT NULL,
            install_path TEXT NOT NULL,
            installed_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            installed_by_operation_id INTEGER,
            UNIQUE(package_id, version),
            FOREIGN KEY (installed_by_operation_id) REFERENCES operations(id) ON DELETE SET NULL
        );

        CREATE INDEX IF NOT EXISTS idx_packages_package_id ON packages(package_id);

        CREATE TABLE IF NOT EXISTS files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            path TEXT NOT NULL,
            sha256_hash TEXT NOT NULL,
            size INTEGER NOT NULL,
            package_row_id INTEGER NOT NULL,
            UNIQUE(package_row_id, path),
            FOREIGN KEY (package_row_id) REFERENCES packages(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_files_package ON files(package_row_id);

        CREATE TABLE IF NOT EXISTS dependencies (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            package_row_id INTEGER NOT NULL,
            depends_on_id TEXT NOT NULL COLLATE NOCASE,
            version_constraint TEXT NOT NULL,
            FOREIGN KEY (package_row_id) REFERENCES packages(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_dependencies_package ON dependencies(package_row_id);
        CREATE INDEX IF NOT EXISTS idx_dependencies_depends_on ON dependencies(depends_on_id);
        ",
    )?;

    Ok(())
}

/// Schema Version 2: remember where each package came from
fn migrate_v2(conn: &Connection) -> Result<()> {
    debug!("Migrating to schema version 2");

    conn.execute_batch(
        "
        ALTER TABLE packages ADD COLUMN source TEXT;
        ALTER TABLE packages ADD COLUMN is_satellite INTEGER NOT NULL DEFAULT 0;
        ",
    )?;

    Ok(())
}
