//! The local store's validity database.
//!
//! A path is valid iff it has a row in `valid_paths`. References are kept in
//! `refs` and must themselves be valid, except for self-references.

use crate::error::{MetadataError, MetadataResult};
use crate::models::{ValidPathRow, join_list};
use depot_core::path_info::PathInfoRecord;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use time::OffsetDateTime;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS valid_paths (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    path              TEXT UNIQUE NOT NULL,
    nar_hash          TEXT,
    nar_size          INTEGER NOT NULL DEFAULT 0,
    deriver           TEXT,
    sigs              TEXT NOT NULL DEFAULT '',
    registration_time INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS refs (
    referrer  INTEGER NOT NULL REFERENCES valid_paths(id) ON DELETE CASCADE,
    reference INTEGER NOT NULL REFERENCES valid_paths(id) ON DELETE RESTRICT,
    PRIMARY KEY (referrer, reference)
);

CREATE INDEX IF NOT EXISTS idx_refs_reference ON refs(reference);
";

pub struct ValidityDb {
    conn: Mutex<Connection>,
}

impl ValidityDb {
    pub fn open(path: &Path) -> MetadataResult<Self> {
        let conn = crate::open_connection(path)?;
        conn.execute_batch(SCHEMA)?;
        tracing::debug!(path = %path.display(), "opened validity database");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn is_valid(&self, path: &str) -> MetadataResult<bool> {
        let conn = self.conn.lock();
        let found = conn
            .query_row(
                "SELECT 1 FROM valid_paths WHERE path = ?1",
                params![path],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Find the valid path whose string starts with `prefix`, if any.
    ///
    /// Used to resolve hash-only lookups, where `prefix` is `<store>/<hash>`.
    pub fn path_from_prefix(&self, prefix: &str) -> MetadataResult<Option<String>> {
        let conn = self.conn.lock();
        let path: Option<String> = conn
            .query_row(
                "SELECT path FROM valid_paths WHERE path >= ?1 ORDER BY path LIMIT 1",
                params![prefix],
                |row| row.get(0),
            )
            .optional()?;
        Ok(path.filter(|p| p.starts_with(prefix)))
    }

    pub fn query_path_info(&self, path: &str) -> MetadataResult<Option<PathInfoRecord>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT id, path, nar_hash, nar_size, deriver, sigs, registration_time
                 FROM valid_paths WHERE path = ?1",
                params![path],
                |row| {
                    let registered: i64 = row.get(6)?;
                    Ok(ValidPathRow {
                        id: row.get(0)?,
                        path: row.get(1)?,
                        nar_hash: row.get(2)?,
                        nar_size: row.get(3)?,
                        deriver: row.get(4)?,
                        sigs: row.get(5)?,
                        registration_time: OffsetDateTime::from_unix_timestamp(registered)
                            .unwrap_or(OffsetDateTime::UNIX_EPOCH),
                    })
                },
            )
            .optional()?;
        let Some(row) = row else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(
            "SELECT p.path FROM refs r JOIN valid_paths p ON p.id = r.reference
             WHERE r.referrer = ?1 ORDER BY p.path",
        )?;
        let references = stmt
            .query_map(params![row.id], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(row.to_record(references)))
    }

    /// When `path` was registered.
    pub fn registration_time(&self, path: &str) -> MetadataResult<Option<OffsetDateTime>> {
        let conn = self.conn.lock();
        let secs: Option<i64> = conn
            .query_row(
                "SELECT registration_time FROM valid_paths WHERE path = ?1",
                params![path],
                |row| row.get(0),
            )
            .optional()?;
        secs.map(|s| {
            OffsetDateTime::from_unix_timestamp(s)
                .map_err(|e| MetadataError::Corrupt(format!("registration time of '{path}': {e}")))
        })
        .transpose()
    }

    /// Register `records` atomically.
    ///
    /// Existing rows are updated in place. Every reference must be valid
    /// already or be part of the same batch.
    pub fn register(&self, records: &[PathInfoRecord]) -> MetadataResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let now = OffsetDateTime::now_utc().unix_timestamp();

        for record in records {
            tx.execute(
                "INSERT INTO valid_paths (path, nar_hash, nar_size, deriver, sigs, registration_time)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(path) DO UPDATE SET
                     nar_hash = excluded.nar_hash,
                     nar_size = excluded.nar_size,
                     deriver = excluded.deriver,
                     sigs = excluded.sigs",
                params![
                    record.path,
                    record.nar_hash,
                    record.nar_size as i64,
                    record.deriver,
                    join_list(&record.sigs),
                    now,
                ],
            )?;
        }

        for record in records {
            let referrer: i64 = tx.query_row(
                "SELECT id FROM valid_paths WHERE path = ?1",
                params![record.path],
                |row| row.get(0),
            )?;
            tx.execute("DELETE FROM refs WHERE referrer = ?1", params![referrer])?;
            for reference in &record.references {
                let id: Option<i64> = tx
                    .query_row(
                        "SELECT id FROM valid_paths WHERE path = ?1",
                        params![reference],
                        |row| row.get(0),
                    )
                    .optional()?;
                let id = id.ok_or_else(|| {
                    MetadataError::Constraint(format!(
                        "cannot register '{}': reference '{reference}' is not valid",
                        record.path
                    ))
                })?;
                tx.execute(
                    "INSERT OR IGNORE INTO refs (referrer, reference) VALUES (?1, ?2)",
                    params![referrer, id],
                )?;
            }
        }

        tx.commit()?;
        tracing::debug!(count = records.len(), "registered valid paths");
        Ok(())
    }

    /// Every valid path, sorted.
    pub fn all_paths(&self) -> MetadataResult<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT path FROM valid_paths ORDER BY path")?;
        let paths = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(paths)
    }
}
