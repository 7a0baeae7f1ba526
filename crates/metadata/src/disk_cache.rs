//! Persistent cache of narinfo lookups, keyed by backend URI and hash part.

use crate::error::MetadataResult;
use crate::models::NarInfoRow;
use depot_core::path_info::PathInfoRecord;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use time::OffsetDateTime;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS nar_infos (
    cache_uri  TEXT NOT NULL,
    hash_part  TEXT NOT NULL,
    present    INTEGER NOT NULL,
    path       TEXT,
    nar_hash   TEXT,
    nar_size   INTEGER NOT NULL DEFAULT 0,
    refs       TEXT NOT NULL DEFAULT '',
    deriver    TEXT,
    sigs       TEXT NOT NULL DEFAULT '',
    timestamp  INTEGER NOT NULL,
    PRIMARY KEY (cache_uri, hash_part)
);
";

/// Result of a disk cache lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiskCacheOutcome {
    /// Nothing is recorded for this key.
    Unknown,
    /// The backend was previously found not to have the path.
    Invalid,
    Valid(PathInfoRecord),
}

/// Persistent narinfo cache shared by every store in a process.
pub trait NarInfoDiskCache: Send + Sync {
    fn lookup(&self, cache_uri: &str, hash_part: &str) -> MetadataResult<DiskCacheOutcome>;

    /// Record `record` for the key, or a negative entry when `record` is `None`.
    fn upsert(
        &self,
        cache_uri: &str,
        hash_part: &str,
        record: Option<&PathInfoRecord>,
    ) -> MetadataResult<()>;
}

/// SQLite-backed [`NarInfoDiskCache`].
pub struct SqliteDiskCache {
    conn: Mutex<Connection>,
}

impl SqliteDiskCache {
    pub fn open(path: &Path) -> MetadataResult<Self> {
        let conn = crate::open_connection(path)?;
        conn.execute_batch(SCHEMA)?;
        tracing::debug!(path = %path.display(), "opened narinfo disk cache");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// An in-memory cache, gone when dropped.
    pub fn in_memory() -> MetadataResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn get_row(&self, cache_uri: &str, hash_part: &str) -> MetadataResult<Option<NarInfoRow>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT present, path, nar_hash, nar_size, refs, deriver, sigs, timestamp
                 FROM nar_infos WHERE cache_uri = ?1 AND hash_part = ?2",
                params![cache_uri, hash_part],
                |row| {
                    let timestamp: i64 = row.get(7)?;
                    Ok(NarInfoRow {
                        cache_uri: cache_uri.to_string(),
                        hash_part: hash_part.to_string(),
                        present: row.get(0)?,
                        path: row.get(1)?,
                        nar_hash: row.get(2)?,
                        nar_size: row.get(3)?,
                        refs: row.get(4)?,
                        deriver: row.get(5)?,
                        sigs: row.get(6)?,
                        timestamp: OffsetDateTime::from_unix_timestamp(timestamp)
                            .unwrap_or(OffsetDateTime::UNIX_EPOCH),
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    fn put_row(&self, row: &NarInfoRow) -> MetadataResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO nar_infos
             (cache_uri, hash_part, present, path, nar_hash, nar_size, refs, deriver, sigs, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                row.cache_uri,
                row.hash_part,
                row.present,
                row.path,
                row.nar_hash,
                row.nar_size,
                row.refs,
                row.deriver,
                row.sigs,
                row.timestamp.unix_timestamp(),
            ],
        )?;
        Ok(())
    }
}

impl NarInfoDiskCache for SqliteDiskCache {
    #[tracing::instrument(skip(self), level = "trace")]
    fn lookup(&self, cache_uri: &str, hash_part: &str) -> MetadataResult<DiskCacheOutcome> {
        Ok(match self.get_row(cache_uri, hash_part)? {
            None => DiskCacheOutcome::Unknown,
            Some(row) => match row.to_record() {
                Some(record) => DiskCacheOutcome::Valid(record),
                None => DiskCacheOutcome::Invalid,
            },
        })
    }

    #[tracing::instrument(skip(self, record), level = "trace")]
    fn upsert(
        &self,
        cache_uri: &str,
        hash_part: &str,
        record: Option<&PathInfoRecord>,
    ) -> MetadataResult<()> {
        let row = match record {
            Some(record) => NarInfoRow::positive(cache_uri, hash_part, record),
            None => NarInfoRow::negative(cache_uri, hash_part),
        };
        self.put_row(&row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> PathInfoRecord {
        PathInfoRecord {
            path: "/nix/store/aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa-x".to_string(),
            nar_hash: Some("sha256:1b8m03r63zqhnjf7l5wnldhh7c134ap5vpj0850ymkq1iyzicy5s".to_string()),
            nar_size: 120,
            references: vec![],
            deriver: None,
            sigs: vec![],
        }
    }

    #[test]
    fn test_unknown_then_valid() {
        let cache = SqliteDiskCache::in_memory().unwrap();
        let hash = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
        assert_eq!(cache.lookup("file:///c", hash).unwrap(), DiskCacheOutcome::Unknown);

        cache.upsert("file:///c", hash, Some(&record())).unwrap();
        assert_eq!(
            cache.lookup("file:///c", hash).unwrap(),
            DiskCacheOutcome::Valid(record())
        );
        // Keyed by URI as well.
        assert_eq!(cache.lookup("file:///d", hash).unwrap(), DiskCacheOutcome::Unknown);
    }

    #[test]
    fn test_negative_entry() {
        let cache = SqliteDiskCache::in_memory().unwrap();
        cache.upsert("daemon", "zzzz", None).unwrap();
        assert_eq!(cache.lookup("daemon", "zzzz").unwrap(), DiskCacheOutcome::Invalid);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache/narinfo.sqlite");
        {
            let cache = SqliteDiskCache::open(&path).unwrap();
            cache
                .upsert("file:///c", "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", Some(&record()))
                .unwrap();
        }
        let cache = SqliteDiskCache::open(&path).unwrap();
        assert!(matches!(
            cache.lookup("file:///c", "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa").unwrap(),
            DiskCacheOutcome::Valid(_)
        ));
    }
}
