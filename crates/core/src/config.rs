//! Configuration types shared across crates.

use crate::store_path::{DEFAULT_HASH_PART_LEN, DEFAULT_STORE_DIR, StoreDir};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Environment variable naming the default store URI.
pub const REMOTE_ENV_VAR: &str = "NIX_REMOTE";

/// Location and shape of the store itself.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Absolute store directory (default `/nix/store`).
    #[serde(default = "default_store_dir")]
    pub store_dir: String,
    /// Root of mutable state: the validity database and the daemon socket.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Daemon socket; defaults to `<state_dir>/daemon-socket/socket`.
    #[serde(default)]
    pub daemon_socket: Option<PathBuf>,
    /// Length of the hash part of store path names.
    #[serde(default = "default_hash_part_len")]
    pub hash_part_len: usize,
}

fn default_store_dir() -> String {
    DEFAULT_STORE_DIR.to_string()
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("/nix/var/nix")
}

fn default_hash_part_len() -> usize {
    DEFAULT_HASH_PART_LEN
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            store_dir: default_store_dir(),
            state_dir: default_state_dir(),
            daemon_socket: None,
            hash_part_len: default_hash_part_len(),
        }
    }
}

impl StoreConfig {
    pub fn store_dir(&self) -> crate::Result<StoreDir> {
        StoreDir::with_hash_part_len(self.store_dir.clone(), self.hash_part_len)
    }

    pub fn daemon_socket_path(&self) -> PathBuf {
        self.daemon_socket
            .clone()
            .unwrap_or_else(|| self.state_dir.join("daemon-socket").join("socket"))
    }

    /// Validate the store configuration.
    pub fn validate(&self) -> Result<(), String> {
        if !self.store_dir.starts_with('/') {
            return Err(format!(
                "store_dir must be an absolute path, got '{}'",
                self.store_dir
            ));
        }
        self.store_dir().map_err(|e| e.to_string())?;
        Ok(())
    }
}

/// Path metadata caching.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    /// SQLite file backing the persistent narinfo cache. Disabled when unset.
    #[serde(default)]
    pub disk_cache: Option<PathBuf>,
}

/// Substituter URIs, in priority order.
///
/// The three lists are concatenated; duplicates are dropped when the set is
/// opened.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SubstituterConfig {
    #[serde(default)]
    pub substituters: Vec<String>,
    /// Legacy name for `substituters`.
    #[serde(default)]
    pub binary_caches: Vec<String>,
    #[serde(default)]
    pub extra_binary_caches: Vec<String>,
}

impl SubstituterConfig {
    /// All configured URIs in priority order, duplicates included.
    pub fn uris(&self) -> impl Iterator<Item = &str> {
        self.substituters
            .iter()
            .chain(&self.binary_caches)
            .chain(&self.extra_binary_caches)
            .map(String::as_str)
    }
}

/// Signing configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SigningConfig {
    /// File holding a `name:base64` secret key.
    pub secret_key_file: PathBuf,
}

/// Complete configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DepotConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub substituters: SubstituterConfig,
    /// `name:base64` public keys accepted by signature checks.
    #[serde(default)]
    pub trusted_public_keys: Vec<String>,
    /// Signing configuration (optional).
    pub signing: Option<SigningConfig>,
}

impl DepotConfig {
    /// Create a test configuration rooted at `root`.
    ///
    /// **For testing only.** The store lives at `<root>/store` and state at
    /// `<root>/var`.
    pub fn for_testing(root: &std::path::Path) -> Self {
        Self {
            store: StoreConfig {
                store_dir: root.join("store").to_string_lossy().into_owned(),
                state_dir: root.join("var"),
                ..StoreConfig::default()
            },
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        self.store.validate()?;
        for key in &self.trusted_public_keys {
            if !key.contains(':') {
                return Err(format!(
                    "trusted public key '{key}' must have the form 'name:base64'"
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DepotConfig::default();
        assert_eq!(config.store.store_dir, "/nix/store");
        assert_eq!(config.store.hash_part_len, 32);
        assert_eq!(
            config.store.daemon_socket_path(),
            PathBuf::from("/nix/var/nix/daemon-socket/socket")
        );
        assert!(config.cache.disk_cache.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_partial() {
        let json = r#"{"store": {"state_dir": "/tmp/state"}, "substituters": {"extra_binary_caches": ["file:///b"], "substituters": ["file:///a"]}}"#;
        let config: DepotConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.store.store_dir, "/nix/store");
        assert_eq!(
            config.store.daemon_socket_path(),
            PathBuf::from("/tmp/state/daemon-socket/socket")
        );
        let uris: Vec<_> = config.substituters.uris().collect();
        assert_eq!(uris, vec!["file:///a", "file:///b"]);
    }

    #[test]
    fn test_validate_rejects_relative_store_dir() {
        let mut config = DepotConfig::default();
        config.store.store_dir = "nix/store".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_hash_part_len() {
        let mut config = DepotConfig::default();
        config.store.hash_part_len = 31;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_malformed_public_key() {
        let mut config = DepotConfig::default();
        config.trusted_public_keys.push("no-separator".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_for_testing_store_dir_is_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let config = DepotConfig::for_testing(dir.path());
        let store = config.store.store_dir().unwrap();
        assert!(store.as_str().starts_with(dir.path().to_str().unwrap()));
    }
}
