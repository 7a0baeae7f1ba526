//! Store backed by the local filesystem and a SQLite validity database.

use crate::error::{StoreError, StoreResult};
use crate::traits::{BackendKind, StoreBackend, verify_nar};
use bytes::Bytes;
use depot_core::nar;
use depot_core::path_info::ValidPathInfo;
use depot_core::store_path::{StoreDir, StorePath};
use depot_metadata::ValidityDb;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::instrument;

/// Location of the validity database below the state directory.
pub fn validity_db_path(state_dir: &Path) -> PathBuf {
    state_dir.join("db").join("db.sqlite")
}

pub struct LocalStore {
    store_dir: StoreDir,
    state_dir: PathBuf,
    db: ValidityDb,
}

impl LocalStore {
    /// Open the store, creating the store directory and database as needed.
    pub fn open(store_dir: StoreDir, state_dir: &Path) -> StoreResult<Self> {
        fs::create_dir_all(store_dir.as_str())?;
        let db = ValidityDb::open(&validity_db_path(state_dir))?;
        tracing::info!(store = store_dir.as_str(), state = %state_dir.display(), "opened local store");
        Ok(Self {
            store_dir,
            state_dir: state_dir.to_path_buf(),
            db,
        })
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// Mark `infos` valid without touching the filesystem.
    ///
    /// Every path must already exist in the store directory.
    pub fn register_valid_paths(&self, infos: &[ValidPathInfo]) -> StoreResult<()> {
        for info in infos {
            if fs::symlink_metadata(info.path.as_str()).is_err() {
                return Err(StoreError::InvalidPath(info.path.to_string()));
            }
        }
        let records: Vec<_> = infos.iter().map(ValidPathInfo::to_record).collect();
        self.db.register(&records)?;
        Ok(())
    }

    /// The full path for `path`, resolving hash-only paths through the database.
    fn resolve(&self, path: &StorePath) -> StoreResult<Option<String>> {
        if !path.name().is_empty() {
            return Ok(Some(path.to_string()));
        }
        let prefix = format!("{}/{}-", self.store_dir.as_str(), path.hash_part());
        Ok(self.db.path_from_prefix(&prefix)?)
    }

    fn restore(&self, path: &StorePath, nar_bytes: &[u8], repair: bool) -> StoreResult<()> {
        let staging = tempfile::Builder::new()
            .prefix(".tmp-")
            .tempdir_in(self.store_dir.as_str())?;
        let staged = staging.path().join("out");
        nar::restore_path(nar_bytes, &staged)?;

        let target = Path::new(path.as_str());
        if fs::symlink_metadata(target).is_ok() {
            if repair {
                tracing::warn!(path = %path, "repairing path");
            }
            remove_path(target)?;
        }
        fs::rename(&staged, target)?;
        Ok(())
    }
}

fn remove_path(path: &Path) -> std::io::Result<()> {
    if fs::symlink_metadata(path)?.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

impl StoreBackend for LocalStore {
    fn uri(&self) -> String {
        "local".to_string()
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn store_dir(&self) -> &StoreDir {
        &self.store_dir
    }

    #[instrument(skip(self), fields(backend = "local"))]
    fn is_valid_path_uncached(&self, path: &StorePath) -> StoreResult<bool> {
        match self.resolve(path)? {
            Some(full) => Ok(self.db.is_valid(&full)?),
            None => Ok(false),
        }
    }

    #[instrument(skip(self), fields(backend = "local"))]
    fn query_path_info_uncached(&self, path: &StorePath) -> StoreResult<Option<ValidPathInfo>> {
        let Some(full) = self.resolve(path)? else {
            return Ok(None);
        };
        match self.db.query_path_info(&full)? {
            Some(record) => Ok(Some(ValidPathInfo::from_record(&self.store_dir, record)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self), fields(backend = "local"))]
    fn nar_from_path(&self, path: &StorePath) -> StoreResult<Bytes> {
        let full = match self.resolve(path)? {
            Some(full) if self.db.is_valid(&full)? => full,
            _ => return Err(StoreError::InvalidPath(path.to_string())),
        };
        let mut sink = Vec::new();
        nar::dump_path(Path::new(&full), &nar::accept_all, &mut sink)?;
        Ok(Bytes::from(sink))
    }

    #[instrument(skip(self, info, nar), fields(backend = "local", path = %info.path, size = nar.len()))]
    fn add_to_store(&self, info: &ValidPathInfo, nar: Bytes, repair: bool) -> StoreResult<()> {
        if !repair && self.db.is_valid(info.path.as_str())? {
            return Ok(());
        }
        if info.path.name().is_empty() || info.path.store_dir() != self.store_dir.as_str() {
            return Err(StoreError::InvalidPath(info.path.to_string()));
        }
        verify_nar(info, &nar)?;
        self.restore(&info.path, &nar, repair)?;

        let mut registered = info.clone();
        registered.nar_size = nar.len() as u64;
        self.db.register(&[registered.to_record()])?;
        tracing::info!(path = %info.path, "added path to local store");
        Ok(())
    }

    fn add_signatures(&self, path: &StorePath, sigs: &BTreeSet<String>) -> StoreResult<()> {
        let mut info = self
            .query_path_info_uncached(path)?
            .ok_or_else(|| StoreError::InvalidPath(path.to_string()))?;
        info.sigs.extend(sigs.iter().cloned());
        self.db.register(&[info.to_record()])?;
        Ok(())
    }

    fn query_all_valid_paths(&self) -> StoreResult<Vec<StorePath>> {
        self.db
            .all_paths()?
            .iter()
            .map(|p| self.store_dir.parse_path(p).map_err(StoreError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_core::hash::{HashAlgorithm, hash_string};

    fn open() -> (tempfile::TempDir, LocalStore) {
        let dir = tempfile::tempdir().unwrap();
        let store_dir = StoreDir::new(dir.path().join("store").to_string_lossy().into_owned());
        let store = LocalStore::open(store_dir, &dir.path().join("var")).unwrap();
        (dir, store)
    }

    fn nar_of(contents: &[u8]) -> (tempfile::TempDir, Bytes) {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        fs::write(&file, contents).unwrap();
        let mut nar = Vec::new();
        nar::dump_path(&file, &nar::accept_all, &mut nar).unwrap();
        (dir, Bytes::from(nar))
    }

    fn info_for(store: &LocalStore, name: &str, nar: &Bytes) -> ValidPathInfo {
        let path = store
            .store_dir()
            .make_store_path("source", &hash_string(HashAlgorithm::Sha256, nar), name)
            .unwrap();
        ValidPathInfo::with_nar(path, hash_string(HashAlgorithm::Sha256, nar), nar.len() as u64)
    }

    #[test]
    fn test_add_and_read_back() {
        let (_dir, store) = open();
        let (_src, nar) = nar_of(b"hello");
        let info = info_for(&store, "hello", &nar);

        assert!(!store.is_valid_path_uncached(&info.path).unwrap());
        store.add_to_store(&info, nar.clone(), false).unwrap();

        assert!(store.is_valid_path_uncached(&info.path).unwrap());
        assert_eq!(fs::read(info.path.as_str()).unwrap(), b"hello");
        assert_eq!(store.nar_from_path(&info.path).unwrap(), nar);
        assert_eq!(
            store.query_path_info_uncached(&info.path).unwrap().unwrap(),
            info
        );
    }

    #[test]
    fn test_hash_only_lookup() {
        let (_dir, store) = open();
        let (_src, nar) = nar_of(b"x");
        let info = info_for(&store, "x", &nar);
        store.add_to_store(&info, nar, false).unwrap();

        let hash_only = store
            .store_dir()
            .parse_path(&format!("{}/{}", store.store_dir().as_str(), info.path.hash_part()))
            .unwrap();
        let found = store.query_path_info_uncached(&hash_only).unwrap().unwrap();
        assert_eq!(found.path, info.path);
    }

    #[test]
    fn test_add_rejects_hash_mismatch() {
        let (_dir, store) = open();
        let (_src, nar) = nar_of(b"real");
        let (_other, forged) = nar_of(b"forged");
        let info = info_for(&store, "real", &nar);

        let err = store.add_to_store(&info, forged, false).unwrap_err();
        assert!(matches!(err, StoreError::HashMismatch { .. }));
        assert!(fs::symlink_metadata(info.path.as_str()).is_err());
    }

    #[test]
    fn test_repair_restores_contents() {
        let (_dir, store) = open();
        let (_src, nar) = nar_of(b"pristine");
        let info = info_for(&store, "pristine", &nar);
        store.add_to_store(&info, nar.clone(), false).unwrap();

        fs::write(info.path.as_str(), b"tampered").unwrap();
        store.add_to_store(&info, nar.clone(), false).unwrap();
        assert_eq!(fs::read(info.path.as_str()).unwrap(), b"tampered");

        store.add_to_store(&info, nar, true).unwrap();
        assert_eq!(fs::read(info.path.as_str()).unwrap(), b"pristine");
    }

    #[test]
    fn test_add_signatures_merges() {
        let (_dir, store) = open();
        let (_src, nar) = nar_of(b"s");
        let info = info_for(&store, "s", &nar);
        store.add_to_store(&info, nar, false).unwrap();

        store
            .add_signatures(&info.path, &BTreeSet::from(["k:AAAA".to_string()]))
            .unwrap();
        let stored = store.query_path_info_uncached(&info.path).unwrap().unwrap();
        assert!(stored.sigs.contains("k:AAAA"));
        assert_eq!(store.query_all_valid_paths().unwrap(), vec![info.path]);
    }
}
