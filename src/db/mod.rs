// src/db/mod.rs

//! Local repository record
//!
//! Every install root carries a small SQLite database that records which
//! packages were installed, by which operation, with which files and
//! dependencies. This module handles:
//! - Database initialization and schema migration
//! - Connection management (one connection per worker)
//! - Transaction handling

pub mod models;
pub mod schema;

use crate::error::{Error, Result};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Directory inside the install root holding stowage's own state
pub const STATE_DIR: &str = ".stowage";

/// Database file name inside [`STATE_DIR`]
pub const DB_FILE_NAME: &str = "state.db";

/// Location of the local repository record for an install root
pub fn db_path(install_root: &Path) -> PathBuf {
    install_root.join(STATE_DIR).join(DB_FILE_NAME)
}

/// Initialize the database at the specified path
///
/// Creates the file if needed and applies pending migrations.
/// Calling it on an existing database is safe.
pub fn init(db_path: &Path) -> Result<()> {
    debug!("Initializing database at: {}", db_path.display());

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| Error::InitError(format!("Failed to create database directory: {}", e)))?;
    }

    let conn = Connection::open(db_path)?;

    // WAL lets concurrent restores (threads or processes) share the file
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
        ",
    )?;

    schema::migrate(&conn)?;

    info!("Database initialized at {}", db_path.display());
    Ok(())
}

/// Open an existing database
pub fn open(db_path: &Path) -> Result<Connection> {
    if !db_path.exists() {
        return Err(Error::DatabaseNotFound(db_path.display().to_string()));
    }

    let conn = Connection::open(db_path)?;

    conn.execute_batch(
        "
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
        ",
    )?;

    Ok(conn)
}

/// Open the record for an install root, creating it on first use
pub fn open_for_root(install_root: &Path) -> Result<Connection> {
    let path = db_path(install_root);
    if !path.exists() {
        init(&path)?;
    }
    let conn = open(&path)?;
    schema::migrate(&conn)?;
    Ok(conn)
}

/// Run `f` inside a write transaction
///
/// The transaction takes the write lock up front so two writers never
/// deadlock upgrading from a read lock. It commits when `f` returns `Ok` and
/// rolls back otherwise.
pub fn transaction<T, F>(conn: &mut Connection, f: F) -> Result<T>
where
    F: FnOnce(&Transaction) -> Result<T>,
{
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let value = f(&tx)?;
    tx.commit()?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_init_creates_database() {
        let temp_file = NamedTempFile::new().unwrap();
        let db_path = temp_file.path().to_path_buf();

        // Remove the temp file so init can create it
        drop(temp_file);

        let result = init(&db_path);
        assert!(result.is_ok());
        assert!(db_path.exists());
    }

    #[test]
    fn test_open_nonexistent_database() {
        let result = open(Path::new("/nonexistent/path/db.sqlite"));
        assert!(matches!(result.unwrap_err(), Error::DatabaseNotFound(_)));
    }

    #[test]
    fn test_open_for_root() {
        let root = TempDir::new().unwrap();
        let conn = open_for_root(root.path()).unwrap();
        assert!(root.path().join(".stowage/state.db").exists());
        assert_eq!(schema::get_schema_version(&conn).unwrap(), schema::SCHEMA_VERSION);

        // Second open reuses the file
        drop(conn);
        assert!(open_for_root(root.path()).is_ok());
    }

    #[test]
    fn test_transaction_commit_and_rollback() {
        let root = TempDir::new().unwrap();
        let mut conn = open_for_root(root.path()).unwrap();

        transaction(&mut conn, |tx| {
            let mut op = models::Operation::new(models::OperationKind::Install, "commit".to_string());
            op.insert(tx)?;
            Ok(())
        })
        .unwrap();

        let result: Result<()> = transaction(&mut conn, |tx| {
            let mut op = models::Operation::new(models::OperationKind::Install, "discard".to_string());
            op.insert(tx)?;
            Err(Error::InitError("boom".to_string()))
        });
        assert!(result.is_err());

        let ops = models::Operation::list_all(&conn).unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].description, "commit");
    }
}
