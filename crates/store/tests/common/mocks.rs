use bytes::Bytes;
use depot_core::path_info::ValidPathInfo;
use depot_core::store_path::{StoreDir, StorePath};
use depot_store::error::{StoreError, StoreResult};
use depot_store::traits::{BackendKind, StoreBackend};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// In-memory backend counting every uncached query it answers.
///
/// Entries are keyed by hash part only, like narinfo files in a binary
/// cache: asking for any name under a known hash part yields the recorded
/// metadata.
pub struct CountingBackend {
    store_dir: StoreDir,
    paths: Mutex<HashMap<String, (ValidPathInfo, Bytes)>>,
    pub valid_queries: AtomicUsize,
    pub info_queries: AtomicUsize,
}

#[allow(dead_code)]
impl CountingBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            store_dir: StoreDir::default(),
            paths: Mutex::new(HashMap::new()),
            valid_queries: AtomicUsize::new(0),
            info_queries: AtomicUsize::new(0),
        })
    }

    /// Seed `info` directly, bypassing `add_to_store`.
    pub fn insert(&self, info: ValidPathInfo, nar: Bytes) {
        self.paths
            .lock()
            .insert(info.path.hash_part().to_string(), (info, nar));
    }

    pub fn valid_queries(&self) -> usize {
        self.valid_queries.load(Ordering::SeqCst)
    }

    pub fn info_queries(&self) -> usize {
        self.info_queries.load(Ordering::SeqCst)
    }

    fn lookup(&self, path: &StorePath) -> Option<(ValidPathInfo, Bytes)> {
        let paths = self.paths.lock();
        paths.get(path.hash_part()).cloned()
    }
}

impl StoreBackend for CountingBackend {
    fn uri(&self) -> String {
        "counting".to_string()
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn store_dir(&self) -> &StoreDir {
        &self.store_dir
    }

    fn is_valid_path_uncached(&self, path: &StorePath) -> StoreResult<bool> {
        self.valid_queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.lookup(path).is_some())
    }

    fn query_path_info_uncached(&self, path: &StorePath) -> StoreResult<Option<ValidPathInfo>> {
        self.info_queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.lookup(path).map(|(info, _)| info))
    }

    fn nar_from_path(&self, path: &StorePath) -> StoreResult<Bytes> {
        self.lookup(path)
            .map(|(_, nar)| nar)
            .ok_or_else(|| StoreError::InvalidPath(path.to_string()))
    }

    fn add_to_store(&self, info: &ValidPathInfo, nar: Bytes, _repair: bool) -> StoreResult<()> {
        self.insert(info.clone(), nar);
        Ok(())
    }
}
