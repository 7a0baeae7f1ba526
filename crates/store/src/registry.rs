//! Resolve connection strings to stores.
//!
//! A [`StoreRegistry`] holds an ordered list of constructors. Opening a URI
//! tries each in registration order and the first one that accepts the URI
//! wins.

use crate::backends::{BinaryCacheStore, DaemonStore, LocalStore};
use crate::cache::Store;
use crate::error::{StoreError, StoreResult};
use crate::substituters::SubstituterSet;
use crate::traits::StoreBackend;
use depot_core::config::{DepotConfig, REMOTE_ENV_VAR};
use depot_core::store_path::StoreDir;
use depot_metadata::{NarInfoDiskCache, SqliteDiskCache};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// `key=value` parameters from the query string of a store URI.
pub type StoreParams = BTreeMap<String, String>;

/// Builds a backend for `(base uri, params)`, or returns `None` if the URI is
/// not one it handles.
pub type StoreConstructor = Arc<
    dyn Fn(&str, &StoreParams, &DepotConfig) -> StoreResult<Option<Arc<dyn StoreBackend>>>
        + Send
        + Sync,
>;

/// Split `uri` into its base and query parameters.
///
/// `local?store=/s&state=/v` yields `("local", {store: /s, state: /v})`. A
/// parameter without `=` maps to the empty string.
pub fn parse_uri(uri: &str) -> (String, StoreParams) {
    let Some((base, query)) = uri.split_once('?') else {
        return (uri.to_string(), StoreParams::new());
    };
    let params = query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect();
    (base.to_string(), params)
}

/// Owns the constructor list and the process-wide substituter set.
pub struct StoreRegistry {
    config: DepotConfig,
    constructors: Mutex<Vec<StoreConstructor>>,
    disk_cache: Option<Arc<dyn NarInfoDiskCache>>,
    substituters: SubstituterSet,
}

impl StoreRegistry {
    /// A registry with no constructors.
    ///
    /// The disk cache configured in `config` is opened here and shared by
    /// every store this registry opens.
    pub fn new(config: DepotConfig) -> StoreResult<Self> {
        let disk_cache = match &config.cache.disk_cache {
            Some(path) => {
                let cache: Arc<dyn NarInfoDiskCache> = Arc::new(SqliteDiskCache::open(path)?);
                tracing::debug!(path = %path.display(), "opened narinfo disk cache");
                Some(cache)
            }
            None => None,
        };
        Ok(Self {
            config,
            constructors: Mutex::new(Vec::new()),
            disk_cache,
            substituters: SubstituterSet::new(),
        })
    }

    /// A registry knowing `daemon`, `local`, auto-detection and `file://`.
    pub fn with_defaults(config: DepotConfig) -> StoreResult<Self> {
        let registry = Self::new(config)?;
        registry.register(Arc::new(open_builtin));
        registry.register(Arc::new(open_binary_cache));
        Ok(registry)
    }

    /// Append a constructor; earlier registrations take precedence.
    pub fn register(&self, constructor: StoreConstructor) {
        self.constructors.lock().push(constructor);
    }

    pub fn config(&self) -> &DepotConfig {
        &self.config
    }

    /// Open the store named by `uri`.
    ///
    /// Constructors run without the registry lock held, so they may open
    /// other stores through the same registry.
    pub fn open_store_at(&self, uri: &str) -> StoreResult<Arc<Store>> {
        let (base, params) = parse_uri(uri);
        let constructors = self.constructors.lock().clone();
        for constructor in &constructors {
            if let Some(backend) = constructor(&base, &params, &self.config)? {
                tracing::debug!(uri, resolved = %backend.uri(), "opened store");
                let store = match &self.disk_cache {
                    Some(disk_cache) => Store::new(backend).with_disk_cache(Arc::clone(disk_cache)),
                    None => Store::new(backend),
                };
                return Ok(Arc::new(store));
            }
        }
        Err(StoreError::UnsupportedUri(uri.to_string()))
    }

    /// Open the store named by `NIX_REMOTE`, auto-detecting when it is unset.
    pub fn open_store(&self) -> StoreResult<Arc<Store>> {
        let uri = std::env::var(REMOTE_ENV_VAR).unwrap_or_default();
        self.open_store_at(&uri)
    }

    /// The configured substituters, opened on first use.
    pub fn substituters(&self) -> StoreResult<Vec<Arc<Store>>> {
        self.substituters.get(self)
    }
}

impl std::fmt::Debug for StoreRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreRegistry")
            .field("constructors", &self.constructors.lock().len())
            .field("disk_cache", &self.disk_cache.is_some())
            .finish()
    }
}

fn store_dir_for(params: &StoreParams, config: &DepotConfig) -> StoreResult<StoreDir> {
    let dir = params
        .get("store")
        .cloned()
        .unwrap_or_else(|| config.store.store_dir.clone());
    Ok(StoreDir::with_hash_part_len(dir, config.store.hash_part_len)?)
}

/// Whether the current process can list and create files in `dir`.
fn is_read_write(dir: &Path) -> bool {
    fs::read_dir(dir).is_ok() && tempfile::tempfile_in(dir).is_ok()
}

fn open_builtin(
    uri: &str,
    params: &StoreParams,
    config: &DepotConfig,
) -> StoreResult<Option<Arc<dyn StoreBackend>>> {
    if !matches!(uri, "daemon" | "local" | "") {
        return Ok(None);
    }
    let store_dir = store_dir_for(params, config)?;
    let state_dir = params
        .get("state")
        .map(PathBuf::from)
        .unwrap_or_else(|| config.store.state_dir.clone());
    let socket = config.store.daemon_socket_path();

    let use_daemon = match uri {
        "daemon" => true,
        "local" => false,
        _ => {
            let daemon = !is_read_write(&state_dir) && socket.exists();
            tracing::debug!(
                state = %state_dir.display(),
                socket = %socket.display(),
                daemon,
                "auto-detected store type"
            );
            daemon
        }
    };

    let backend: Arc<dyn StoreBackend> = if use_daemon {
        Arc::new(DaemonStore::new(store_dir, socket))
    } else {
        Arc::new(LocalStore::open(store_dir, &state_dir)?)
    };
    Ok(Some(backend))
}

fn open_binary_cache(
    uri: &str,
    params: &StoreParams,
    config: &DepotConfig,
) -> StoreResult<Option<Arc<dyn StoreBackend>>> {
    let Some(root) = uri.strip_prefix("file://") else {
        return Ok(None);
    };
    if root.is_empty() {
        return Err(StoreError::Config(format!(
            "binary cache URI '{uri}' has no directory"
        )));
    }
    let store_dir = store_dir_for(params, config)?;
    Ok(Some(Arc::new(BinaryCacheStore::open(store_dir, root)?)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_uri() {
        let (base, params) = parse_uri("local?store=/s&state=/v");
        assert_eq!(base, "local");
        assert_eq!(params.get("store").map(String::as_str), Some("/s"));
        assert_eq!(params.get("state").map(String::as_str), Some("/v"));

        let (base, params) = parse_uri("daemon");
        assert_eq!(base, "daemon");
        assert!(params.is_empty());

        let (base, params) = parse_uri("?flag&&x=");
        assert_eq!(base, "");
        assert_eq!(params.get("flag").map(String::as_str), Some(""));
        assert_eq!(params.get("x").map(String::as_str), Some(""));
    }

    #[test]
    fn test_empty_registry_rejects_everything() {
        let dir = tempfile::tempdir().unwrap();
        let registry = StoreRegistry::new(DepotConfig::for_testing(dir.path())).unwrap();
        let err = registry.open_store_at("local").unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedUri(uri) if uri == "local"));
    }

    #[test]
    fn test_first_constructor_wins() {
        let dir = tempfile::tempdir().unwrap();
        let registry = StoreRegistry::new(DepotConfig::for_testing(dir.path())).unwrap();
        let cache_root = dir.path().join("first");
        let root = cache_root.clone();
        registry.register(Arc::new(
            move |uri: &str,
                  _: &StoreParams,
                  _: &DepotConfig|
                  -> StoreResult<Option<Arc<dyn StoreBackend>>> {
            if uri != "custom" {
                return Ok(None);
            }
            let store = BinaryCacheStore::open(StoreDir::default(), root.clone())?;
            Ok(Some(Arc::new(store)))
        },
        ));
        registry.register(Arc::new(
            |_: &str, _: &StoreParams, _: &DepotConfig| -> StoreResult<Option<Arc<dyn StoreBackend>>> {
                Err(StoreError::Config("second constructor consulted".to_string()))
            },
        ));

        let store = registry.open_store_at("custom").unwrap();
        assert_eq!(store.uri(), format!("file://{}", cache_root.display()));
    }

    #[test]
    fn test_constructor_can_reenter_registry() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(StoreRegistry::new(DepotConfig::for_testing(dir.path())).unwrap());
        let weak = Arc::downgrade(&registry);
        registry.register(Arc::new(
            move |uri: &str,
                  _: &StoreParams,
                  _: &DepotConfig|
                  -> StoreResult<Option<Arc<dyn StoreBackend>>> {
            if uri != "alias" {
                return Ok(None);
            }
            let registry = weak.upgrade().unwrap();
            let target = registry.open_store_at("target")?;
            Ok(Some(Arc::clone(target.backend())))
        },
        ));
        let root = dir.path().join("target");
        let target_root = root.clone();
        registry.register(Arc::new(
            move |uri: &str,
                  _: &StoreParams,
                  _: &DepotConfig|
                  -> StoreResult<Option<Arc<dyn StoreBackend>>> {
            if uri != "target" {
                return Ok(None);
            }
            let store = BinaryCacheStore::open(StoreDir::default(), target_root.clone())?;
            Ok(Some(Arc::new(store)))
        },
        ));

        let store = registry.open_store_at("alias").unwrap();
        assert_eq!(store.uri(), format!("file://{}", root.display()));
    }
}
