//! The tiered path-info cache in front of a backend.
//!
//! Lookups go memory, then the optional disk cache, then the backend. Both
//! tiers are keyed by hash part and remember negative verdicts as well as
//! positive ones. Entries never expire during the life of a [`Store`].

use crate::error::{StoreError, StoreResult};
use crate::traits::StoreBackend;
use bytes::Bytes;
use depot_core::path_info::ValidPathInfo;
use depot_core::store_path::{StoreDir, StorePath};
use depot_metadata::{DiskCacheOutcome, NarInfoDiskCache};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Clone, Debug)]
enum CacheEntry {
    Invalid,
    Valid(Arc<ValidPathInfo>),
}

/// Snapshot of cache counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Uncached backend metadata queries.
    pub narinfo_read: u64,
    /// Lookups answered by the memory or disk cache.
    pub narinfo_read_averted: u64,
    /// Backend queries that found nothing.
    pub narinfo_missing: u64,
    /// Entries in the memory cache.
    pub path_info_cache_size: u64,
}

#[derive(Default)]
struct Counters {
    narinfo_read: AtomicU64,
    narinfo_read_averted: AtomicU64,
    narinfo_missing: AtomicU64,
}

/// A backend together with its path-info cache.
pub struct Store {
    backend: Arc<dyn StoreBackend>,
    disk_cache: Option<Arc<dyn NarInfoDiskCache>>,
    path_info_cache: Mutex<HashMap<String, CacheEntry>>,
    counters: Counters,
}

impl Store {
    pub fn new(backend: Arc<dyn StoreBackend>) -> Self {
        Self {
            backend,
            disk_cache: None,
            path_info_cache: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    /// Consult `disk_cache` between the memory cache and the backend.
    pub fn with_disk_cache(mut self, disk_cache: Arc<dyn NarInfoDiskCache>) -> Self {
        self.disk_cache = Some(disk_cache);
        self
    }

    pub fn backend(&self) -> &Arc<dyn StoreBackend> {
        &self.backend
    }

    pub fn uri(&self) -> String {
        self.backend.uri()
    }

    pub fn store_dir(&self) -> &StoreDir {
        self.backend.store_dir()
    }

    /// Whether `path` is valid in this store.
    ///
    /// A path the backend does not have yields `Ok(false)`; errors are
    /// reserved for backend failures.
    pub fn is_valid_path(&self, path: &StorePath) -> StoreResult<bool> {
        let hash_part = path.hash_part();

        if let Some(entry) = self.memory_lookup(hash_part) {
            return Ok(Self::accepts(&entry, path).is_some());
        }
        if let Some(entry) = self.disk_lookup(hash_part) {
            return Ok(Self::accepts(&entry, path).is_some());
        }

        self.counters.narinfo_read.fetch_add(1, Ordering::Relaxed);
        let valid = self.backend.is_valid_path_uncached(path)?;
        if !valid {
            tracing::debug!(path = %path, "backend reports path invalid");
            self.counters.narinfo_missing.fetch_add(1, Ordering::Relaxed);
            self.disk_upsert(hash_part, None);
            self.memory_upsert(hash_part, CacheEntry::Invalid);
        }
        Ok(valid)
    }

    /// Metadata for `path`, or [`StoreError::InvalidPath`] if it is not valid.
    pub fn query_path_info(&self, path: &StorePath) -> StoreResult<Arc<ValidPathInfo>> {
        let hash_part = path.hash_part();
        let invalid = || StoreError::InvalidPath(path.to_string());

        if let Some(entry) = self.memory_lookup(hash_part) {
            return Self::accepts(&entry, path).ok_or_else(invalid);
        }
        if let Some(entry) = self.disk_lookup(hash_part) {
            return Self::accepts(&entry, path).ok_or_else(invalid);
        }

        let entry = self.fetch(path)?;
        match Self::accepts(&entry, path) {
            Some(info) => Ok(info),
            None => {
                self.counters.narinfo_missing.fetch_add(1, Ordering::Relaxed);
                Err(invalid())
            }
        }
    }

    pub fn nar_from_path(&self, path: &StorePath) -> StoreResult<Bytes> {
        self.backend.nar_from_path(path)
    }

    /// Import a NAR.
    ///
    /// Both cache tiers are then refreshed from the backend, which may have
    /// kept earlier metadata or normalised the size it recorded.
    pub fn add_to_store(&self, info: &ValidPathInfo, nar: Bytes, repair: bool) -> StoreResult<()> {
        self.backend.add_to_store(info, nar, repair)?;
        self.fetch(&info.path)?;
        Ok(())
    }

    /// Merge `sigs` into the signatures of `path` and refresh both cache tiers.
    pub fn add_signatures(&self, path: &StorePath, sigs: &BTreeSet<String>) -> StoreResult<()> {
        self.backend.add_signatures(path, sigs)?;
        self.fetch(path)?;
        Ok(())
    }

    pub fn query_all_valid_paths(&self) -> StoreResult<Vec<StorePath>> {
        self.backend.query_all_valid_paths()
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            narinfo_read: self.counters.narinfo_read.load(Ordering::Relaxed),
            narinfo_read_averted: self.counters.narinfo_read_averted.load(Ordering::Relaxed),
            narinfo_missing: self.counters.narinfo_missing.load(Ordering::Relaxed),
            path_info_cache_size: self.path_info_cache.lock().len() as u64,
        }
    }

    /// The cached metadata if it answers a query for `path`.
    ///
    /// Metadata recorded under the same hash part but a different path is
    /// rejected unless the query names only the hash part.
    fn accepts(entry: &CacheEntry, path: &StorePath) -> Option<Arc<ValidPathInfo>> {
        match entry {
            CacheEntry::Invalid => None,
            CacheEntry::Valid(info) if info.path != *path && !path.name().is_empty() => None,
            CacheEntry::Valid(info) => Some(Arc::clone(info)),
        }
    }

    /// Ask the backend for `path` and record its answer in both tiers.
    fn fetch(&self, path: &StorePath) -> StoreResult<CacheEntry> {
        let hash_part = path.hash_part();
        self.counters.narinfo_read.fetch_add(1, Ordering::Relaxed);
        let info = self.backend.query_path_info_uncached(path)?.map(Arc::new);
        self.disk_upsert(hash_part, info.as_deref());
        let entry = match info {
            Some(info) => CacheEntry::Valid(info),
            None => CacheEntry::Invalid,
        };
        self.memory_upsert(hash_part, entry.clone());
        Ok(entry)
    }

    fn memory_lookup(&self, hash_part: &str) -> Option<CacheEntry> {
        let entry = self.path_info_cache.lock().get(hash_part).cloned()?;
        self.counters.narinfo_read_averted.fetch_add(1, Ordering::Relaxed);
        Some(entry)
    }

    fn memory_upsert(&self, hash_part: &str, entry: CacheEntry) {
        self.path_info_cache
            .lock()
            .insert(hash_part.to_string(), entry);
    }

    /// A definitive disk cache verdict, copied into the memory cache.
    fn disk_lookup(&self, hash_part: &str) -> Option<CacheEntry> {
        let disk_cache = self.disk_cache.as_ref()?;
        let uri = self.backend.uri();
        let entry = match disk_cache.lookup(&uri, hash_part) {
            Ok(DiskCacheOutcome::Unknown) => return None,
            Ok(DiskCacheOutcome::Invalid) => CacheEntry::Invalid,
            Ok(DiskCacheOutcome::Valid(record)) => {
                match ValidPathInfo::from_record(self.store_dir(), record) {
                    Ok(info) => CacheEntry::Valid(Arc::new(info)),
                    Err(e) => {
                        tracing::warn!(%uri, hash_part, error = %e, "ignoring corrupt disk cache entry");
                        return None;
                    }
                }
            }
            Err(e) => {
                tracing::warn!(%uri, hash_part, error = %e, "disk cache lookup failed");
                return None;
            }
        };
        tracing::debug!(%uri, hash_part, "disk cache hit");
        self.counters.narinfo_read_averted.fetch_add(1, Ordering::Relaxed);
        self.memory_upsert(hash_part, entry.clone());
        Some(entry)
    }

    fn disk_upsert(&self, hash_part: &str, info: Option<&ValidPathInfo>) {
        let Some(disk_cache) = &self.disk_cache else {
            return;
        };
        let record = info.map(ValidPathInfo::to_record);
        let uri = self.backend.uri();
        if let Err(e) = disk_cache.upsert(&uri, hash_part, record.as_ref()) {
            tracing::warn!(%uri, hash_part, error = %e, "disk cache update failed");
        }
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("uri", &self.backend.uri())
            .field("disk_cache", &self.disk_cache.is_some())
            .finish()
    }
}
