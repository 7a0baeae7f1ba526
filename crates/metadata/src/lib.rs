//! SQLite-backed metadata for the depot store.
//!
//! This crate provides:
//! - The persistent narinfo cache shared between store instances
//! - The validity database of the local store

pub mod disk_cache;
pub mod error;
pub mod models;
pub mod validity;

pub use disk_cache::{DiskCacheOutcome, NarInfoDiskCache, SqliteDiskCache};
pub use error::{MetadataError, MetadataResult};
pub use validity::ValidityDb;

use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

/// Open a SQLite database, creating its parent directory.
pub(crate) fn open_connection(path: &Path) -> MetadataResult<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;
    // Prevent transient "database is locked" errors under concurrent access.
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))?;
    conn.execute_batch("PRAGMA foreign_keys=ON; PRAGMA synchronous=NORMAL;")?;
    Ok(conn)
}
