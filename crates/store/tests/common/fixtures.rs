use bytes::Bytes;
use depot_core::config::DepotConfig;
use depot_core::hash::{HashAlgorithm, hash_string};
use depot_core::nar;
use depot_core::path_info::ValidPathInfo;
use depot_core::store_path::StoreDir;
use depot_store::LocalStore;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A scratch directory with a store and state directory below it.
pub struct TestEnv {
    pub dir: TempDir,
    pub config: DepotConfig,
}

#[allow(dead_code)]
impl TestEnv {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let config = DepotConfig::for_testing(dir.path());
        Self { dir, config }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn store_dir(&self) -> StoreDir {
        self.config.store.store_dir().unwrap()
    }

    pub fn state_dir(&self) -> PathBuf {
        self.config.store.state_dir.clone()
    }

    pub fn open_local(&self) -> LocalStore {
        LocalStore::open(self.store_dir(), &self.state_dir()).unwrap()
    }
}

/// NAR serialisation of a regular file holding `contents`.
pub fn nar_of_file(contents: &[u8]) -> Bytes {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("file");
    std::fs::write(&file, contents).unwrap();
    let mut nar = Vec::new();
    nar::dump_path(&file, &nar::accept_all, &mut nar).unwrap();
    Bytes::from(nar)
}

/// Metadata for a source path named `name` whose NAR is `nar`.
pub fn source_info(store_dir: &StoreDir, name: &str, nar: &[u8]) -> ValidPathInfo {
    let hash = hash_string(HashAlgorithm::Sha256, nar);
    let path = store_dir.make_store_path("source", &hash, name).unwrap();
    ValidPathInfo::with_nar(path, hash, nar.len() as u64)
}
