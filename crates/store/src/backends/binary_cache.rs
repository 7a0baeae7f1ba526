//! A binary cache laid out in a local directory (`file://<dir>`).
//!
//! ```text
//! <root>/nix-cache-info
//! <root>/<hash part>.narinfo
//! <root>/nar/<hash part>.nar
//! ```

use crate::error::{StoreError, StoreResult};
use crate::traits::{BackendKind, StoreBackend, verify_nar};
use bytes::Bytes;
use depot_core::narinfo::NarInfo;
use depot_core::path_info::ValidPathInfo;
use depot_core::store_path::{StoreDir, StorePath};
use std::collections::BTreeSet;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::instrument;

const CACHE_INFO_FILE: &str = "nix-cache-info";

#[derive(Debug)]
pub struct BinaryCacheStore {
    store_dir: StoreDir,
    root: PathBuf,
}

impl BinaryCacheStore {
    /// Open the cache at `root`, initialising it if it is empty.
    ///
    /// An existing cache built for a different store directory is refused.
    pub fn open(store_dir: StoreDir, root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(root.join("nar"))?;
        let store = Self { store_dir, root };

        match fs::read_to_string(store.root.join(CACHE_INFO_FILE)) {
            Ok(text) => {
                let cache_store_dir = text
                    .lines()
                    .find_map(|line| line.strip_prefix("StoreDir: "))
                    .map(str::trim);
                if let Some(dir) = cache_store_dir
                    && dir != store.store_dir.as_str()
                {
                    return Err(StoreError::Config(format!(
                        "binary cache '{}' is for store '{dir}', not '{}'",
                        store.uri(),
                        store.store_dir.as_str()
                    )));
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let info = format!("StoreDir: {}\n", store.store_dir.as_str());
                store.write_atomic(CACHE_INFO_FILE, info.as_bytes())?;
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(uri = %store.uri(), "opened binary cache");
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn narinfo_key(hash_part: &str) -> String {
        format!("{hash_part}.narinfo")
    }

    /// Write `data` to `key` via a temporary file in the same directory.
    fn write_atomic(&self, key: &str, data: &[u8]) -> StoreResult<()> {
        let path = self.root.join(key);
        let dir = path.parent().unwrap_or(&self.root);
        let mut file = tempfile::NamedTempFile::new_in(dir)?;
        file.write_all(data)?;
        file.as_file().sync_all()?;
        file.persist(&path).map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }

    fn read_optional(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        match fs::read(self.root.join(key)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn read_narinfo(&self, path: &StorePath) -> StoreResult<Option<NarInfo>> {
        let Some(data) = self.read_optional(&Self::narinfo_key(path.hash_part()))? else {
            return Ok(None);
        };
        let text = String::from_utf8_lossy(&data);
        Ok(Some(NarInfo::parse(&self.store_dir, &text)?))
    }

    fn write_narinfo(&self, narinfo: &NarInfo) -> StoreResult<()> {
        let key = Self::narinfo_key(narinfo.info.path.hash_part());
        self.write_atomic(&key, narinfo.to_narinfo_text().as_bytes())
    }
}

impl StoreBackend for BinaryCacheStore {
    fn uri(&self) -> String {
        format!("file://{}", self.root.display())
    }

    fn kind(&self) -> BackendKind {
        BackendKind::BinaryCache
    }

    fn store_dir(&self) -> &StoreDir {
        &self.store_dir
    }

    #[instrument(skip(self), fields(backend = "binary-cache"))]
    fn is_valid_path_uncached(&self, path: &StorePath) -> StoreResult<bool> {
        Ok(self.root.join(Self::narinfo_key(path.hash_part())).is_file())
    }

    #[instrument(skip(self), fields(backend = "binary-cache"))]
    fn query_path_info_uncached(&self, path: &StorePath) -> StoreResult<Option<ValidPathInfo>> {
        Ok(self.read_narinfo(path)?.map(|narinfo| narinfo.info))
    }

    #[instrument(skip(self), fields(backend = "binary-cache"))]
    fn nar_from_path(&self, path: &StorePath) -> StoreResult<Bytes> {
        let narinfo = self
            .read_narinfo(path)?
            .ok_or_else(|| StoreError::InvalidPath(path.to_string()))?;
        if narinfo.compression != "none" {
            return Err(StoreError::Unsupported {
                uri: self.uri(),
                operation: "compressed NARs",
            });
        }
        let nar = self
            .read_optional(&narinfo.url)?
            .ok_or_else(|| StoreError::InvalidPath(path.to_string()))?;
        Ok(Bytes::from(nar))
    }

    #[instrument(skip(self, info, nar), fields(backend = "binary-cache", path = %info.path, size = nar.len()))]
    fn add_to_store(&self, info: &ValidPathInfo, nar: Bytes, repair: bool) -> StoreResult<()> {
        if !repair && self.is_valid_path_uncached(&info.path)? {
            return Ok(());
        }
        if info.path.name().is_empty() {
            return Err(StoreError::InvalidPath(info.path.to_string()));
        }
        verify_nar(info, &nar)?;

        let mut info = info.clone();
        info.nar_size = nar.len() as u64;
        let narinfo = NarInfo::uncompressed(info);
        // The NAR goes first so a visible narinfo always has its NAR.
        self.write_atomic(&narinfo.url, &nar)?;
        self.write_narinfo(&narinfo)?;
        tracing::info!(path = %narinfo.info.path, uri = %self.uri(), "uploaded path to binary cache");
        Ok(())
    }

    fn add_signatures(&self, path: &StorePath, sigs: &BTreeSet<String>) -> StoreResult<()> {
        let mut narinfo = self
            .read_narinfo(path)?
            .ok_or_else(|| StoreError::InvalidPath(path.to_string()))?;
        narinfo.info.sigs.extend(sigs.iter().cloned());
        self.write_narinfo(&narinfo)
    }

    fn query_all_valid_paths(&self) -> StoreResult<Vec<StorePath>> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(hash_part) = file_name.to_str().and_then(|n| n.strip_suffix(".narinfo"))
            else {
                continue;
            };
            let hash_only = self
                .store_dir
                .parse_path(&format!("{}/{hash_part}", self.store_dir.as_str()))?;
            match self.read_narinfo(&hash_only) {
                Ok(Some(narinfo)) => paths.push(narinfo.info.path),
                Ok(None) => {}
                Err(e) => tracing::warn!(hash_part, error = %e, "skipping unreadable narinfo"),
            }
        }
        paths.sort();
        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_core::hash::{HashAlgorithm, hash_string};

    fn info_for(store_dir: &StoreDir, nar: &[u8]) -> ValidPathInfo {
        let hash = hash_string(HashAlgorithm::Sha256, nar);
        let path = store_dir.make_store_path("source", &hash, "blob").unwrap();
        ValidPathInfo::with_nar(path, hash, nar.len() as u64)
    }

    #[test]
    fn test_layout_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = BinaryCacheStore::open(StoreDir::default(), dir.path()).unwrap();
        let info = info_for(store.store_dir(), b"nar bytes");

        store
            .add_to_store(&info, Bytes::from_static(b"nar bytes"), false)
            .unwrap();

        let hash_part = info.path.hash_part();
        let narinfo = fs::read_to_string(dir.path().join(format!("{hash_part}.narinfo"))).unwrap();
        assert!(narinfo.contains(&format!("URL: nar/{hash_part}.nar")));
        assert!(narinfo.contains("Compression: none"));
        assert_eq!(
            fs::read(dir.path().join("nar").join(format!("{hash_part}.nar"))).unwrap(),
            b"nar bytes"
        );
        assert_eq!(
            fs::read_to_string(dir.path().join(CACHE_INFO_FILE)).unwrap(),
            "StoreDir: /nix/store\n"
        );

        assert_eq!(store.query_path_info_uncached(&info.path).unwrap().unwrap(), info);
        assert_eq!(store.nar_from_path(&info.path).unwrap().as_ref(), b"nar bytes");
        assert_eq!(store.query_all_valid_paths().unwrap(), vec![info.path]);
    }

    #[test]
    fn test_rejects_foreign_store_dir() {
        let dir = tempfile::tempdir().unwrap();
        BinaryCacheStore::open(StoreDir::default(), dir.path()).unwrap();

        let err = BinaryCacheStore::open(StoreDir::new("/other/store"), dir.path()).unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
    }

    #[test]
    fn test_signatures_are_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let store = BinaryCacheStore::open(StoreDir::default(), dir.path()).unwrap();
        let info = info_for(store.store_dir(), b"x");
        store.add_to_store(&info, Bytes::from_static(b"x"), false).unwrap();

        store
            .add_signatures(&info.path, &BTreeSet::from(["cache-1:c2ln".to_string()]))
            .unwrap();

        let reopened = BinaryCacheStore::open(StoreDir::default(), dir.path()).unwrap();
        let stored = reopened.query_path_info_uncached(&info.path).unwrap().unwrap();
        assert_eq!(stored.sigs, BTreeSet::from(["cache-1:c2ln".to_string()]));
    }

    #[test]
    fn test_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        let store = BinaryCacheStore::open(StoreDir::default(), dir.path()).unwrap();
        let info = info_for(store.store_dir(), b"absent");

        assert!(!store.is_valid_path_uncached(&info.path).unwrap());
        assert!(store.query_path_info_uncached(&info.path).unwrap().is_none());
        assert!(store.nar_from_path(&info.path).unwrap_err().is_invalid_path());
    }
}
