//! Database rows and their mapping to path metadata records.

use depot_core::path_info::PathInfoRecord;
use time::OffsetDateTime;

/// Space-separated list column.
pub(crate) fn join_list(items: &[String]) -> String {
    items.join(" ")
}

pub(crate) fn split_list(column: &str) -> Vec<String> {
    column.split_whitespace().map(str::to_string).collect()
}

/// A row of the narinfo disk cache.
///
/// `present == false` records a confirmed absence.
#[derive(Debug, Clone)]
pub struct NarInfoRow {
    pub cache_uri: String,
    pub hash_part: String,
    pub present: bool,
    pub path: Option<String>,
    pub nar_hash: Option<String>,
    pub nar_size: i64,
    pub refs: String,
    pub deriver: Option<String>,
    pub sigs: String,
    pub timestamp: OffsetDateTime,
}

impl NarInfoRow {
    pub fn positive(cache_uri: &str, hash_part: &str, record: &PathInfoRecord) -> Self {
        Self {
            cache_uri: cache_uri.to_string(),
            hash_part: hash_part.to_string(),
            present: true,
            path: Some(record.path.clone()),
            nar_hash: record.nar_hash.clone(),
            nar_size: record.nar_size as i64,
            refs: join_list(&record.references),
            deriver: record.deriver.clone(),
            sigs: join_list(&record.sigs),
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    pub fn negative(cache_uri: &str, hash_part: &str) -> Self {
        Self {
            cache_uri: cache_uri.to_string(),
            hash_part: hash_part.to_string(),
            present: false,
            path: None,
            nar_hash: None,
            nar_size: 0,
            refs: String::new(),
            deriver: None,
            sigs: String::new(),
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    /// The cached record; `None` for a negative row.
    pub fn to_record(&self) -> Option<PathInfoRecord> {
        let path = self.path.clone().filter(|_| self.present)?;
        Some(PathInfoRecord {
            path,
            nar_hash: self.nar_hash.clone(),
            nar_size: self.nar_size.max(0) as u64,
            references: split_list(&self.refs),
            deriver: self.deriver.clone(),
            sigs: split_list(&self.sigs),
        })
    }
}

/// A row of the local validity database.
#[derive(Debug, Clone)]
pub struct ValidPathRow {
    pub id: i64,
    pub path: String,
    pub nar_hash: Option<String>,
    pub nar_size: i64,
    pub deriver: Option<String>,
    pub sigs: String,
    pub registration_time: OffsetDateTime,
}

impl ValidPathRow {
    pub fn to_record(&self, references: Vec<String>) -> PathInfoRecord {
        PathInfoRecord {
            path: self.path.clone(),
            nar_hash: self.nar_hash.clone(),
            nar_size: self.nar_size.max(0) as u64,
            references,
            deriver: self.deriver.clone(),
            sigs: split_list(&self.sigs),
        }
    }
}
