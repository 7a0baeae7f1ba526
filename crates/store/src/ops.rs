//! Operations written against any store.

use crate::backends::LocalStore;
use crate::cache::Store;
use crate::error::{StoreError, StoreResult};
use crate::traits::StoreBackend;
use depot_core::hash::{HashAlgorithm, hash_path};
use depot_core::nar;
use depot_core::registration::{decode_valid_path_info, encode_record};
use depot_core::store_path::StorePath;
use std::collections::BTreeSet;
use std::io::BufRead;
use std::path::Path;
use tracing::instrument;

/// Copy `path` with its metadata from `src` into `dst`.
#[instrument(skip(src, dst), fields(from = %src.uri(), to = %dst.uri()))]
pub fn copy_store_path(src: &Store, dst: &Store, path: &StorePath, repair: bool) -> StoreResult<()> {
    let info = src.query_path_info(path)?;
    let nar = src.nar_from_path(&info.path)?;
    tracing::info!(path = %info.path, size = nar.len(), "copying path");
    dst.add_to_store(&info, nar, repair)
}

/// Render `paths` as a validity registration.
///
/// Derivers are written only when `show_derivers` is set; NAR hash and size
/// only when `show_hash` is set.
pub fn make_validity_registration(
    store: &Store,
    paths: &BTreeSet<StorePath>,
    show_derivers: bool,
    show_hash: bool,
) -> StoreResult<String> {
    let mut out = String::new();
    for path in paths {
        let info = store.query_path_info(path)?;
        encode_record(&info, show_derivers, show_hash, &mut out);
    }
    Ok(out)
}

/// Register every record read from `reader` as valid in `store`.
///
/// Without `hash_given` the NAR hash and size are computed from the paths on
/// disk. Returns the number of paths registered.
pub fn register_validity(
    store: &LocalStore,
    reader: &mut impl BufRead,
    hash_given: bool,
) -> StoreResult<usize> {
    let store_dir = store.store_dir().clone();
    let mut infos = Vec::new();
    while let Some(mut info) = decode_valid_path_info(&store_dir, reader, hash_given)? {
        if !hash_given {
            let (hash, size) = hash_path(
                HashAlgorithm::Sha256,
                Path::new(info.path.as_str()),
                &nar::accept_all,
            )
            .map_err(|e| match e {
                depot_core::Error::Io(io) if io.kind() == std::io::ErrorKind::NotFound => {
                    StoreError::InvalidPath(info.path.to_string())
                }
                e => e.into(),
            })?;
            info.nar_hash = Some(hash);
            info.nar_size = size;
        }
        infos.push(info);
    }
    store.register_valid_paths(&infos)?;
    tracing::info!(count = infos.len(), "registered valid paths");
    Ok(infos.len())
}
