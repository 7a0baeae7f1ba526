//! The capability set every store backend implements.

use crate::error::{StoreError, StoreResult};
use bytes::Bytes;
use depot_core::path_info::ValidPathInfo;
use depot_core::store_path::{StoreDir, StorePath};
use std::collections::BTreeSet;

/// The fixed set of concrete backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    Local,
    Daemon,
    BinaryCache,
}

/// An authoritative store implementation.
///
/// Methods ending in `_uncached` always hit the backend; caching is layered on
/// top by [`crate::Store`]. A `path` may carry an empty name, in which case
/// only its hash part identifies the object.
pub trait StoreBackend: Send + Sync {
    /// The connection string this backend was opened from.
    fn uri(&self) -> String;

    fn kind(&self) -> BackendKind;

    fn store_dir(&self) -> &StoreDir;

    fn is_valid_path_uncached(&self, path: &StorePath) -> StoreResult<bool>;

    /// Metadata for `path`, or `None` if the backend does not have it.
    fn query_path_info_uncached(&self, path: &StorePath) -> StoreResult<Option<ValidPathInfo>>;

    /// The NAR serialisation of a valid path.
    fn nar_from_path(&self, path: &StorePath) -> StoreResult<Bytes>;

    /// Import a NAR described by `info`.
    ///
    /// Already-valid paths are left alone unless `repair` is set.
    fn add_to_store(&self, info: &ValidPathInfo, nar: Bytes, repair: bool) -> StoreResult<()>;

    /// Merge `sigs` into the signatures recorded for `path`.
    fn add_signatures(&self, path: &StorePath, sigs: &BTreeSet<String>) -> StoreResult<()> {
        let _ = (path, sigs);
        Err(StoreError::Unsupported {
            uri: self.uri(),
            operation: "adding signatures",
        })
    }

    /// Every valid path, sorted.
    fn query_all_valid_paths(&self) -> StoreResult<Vec<StorePath>> {
        Err(StoreError::Unsupported {
            uri: self.uri(),
            operation: "listing valid paths",
        })
    }
}

/// Check a NAR against the hash and size promised by `info`.
pub(crate) fn verify_nar(info: &ValidPathInfo, nar: &[u8]) -> StoreResult<()> {
    let expected = info
        .nar_hash
        .as_ref()
        .ok_or_else(|| StoreError::MissingNarHash(info.path.to_string()))?;
    let actual = depot_core::hash::hash_string(expected.algorithm(), nar);
    if &actual != expected {
        return Err(StoreError::HashMismatch {
            path: info.path.to_string(),
            expected: expected.to_typed_nix32(),
            actual: actual.to_typed_nix32(),
        });
    }
    if info.nar_size != 0 && info.nar_size != nar.len() as u64 {
        return Err(StoreError::HashMismatch {
            path: info.path.to_string(),
            expected: format!("{} bytes", info.nar_size),
            actual: format!("{} bytes", nar.len()),
        });
    }
    Ok(())
}
