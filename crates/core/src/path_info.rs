//! Accepted metadata for a store path.

use crate::hash::Hash;
use crate::store_path::{StoreDir, StorePath};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Metadata for one valid store path.
///
/// Instances are immutable once handed out by a store; caches share them
/// behind an `Arc`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidPathInfo {
    /// The path this metadata describes.
    pub path: StorePath,
    /// Hash of the NAR serialisation, normally SHA-256.
    pub nar_hash: Option<Hash>,
    /// Size of the NAR serialisation; 0 means unknown.
    pub nar_size: u64,
    /// Paths this path refers to. May include the path itself.
    pub references: BTreeSet<StorePath>,
    /// The derivation that produced this path, if known.
    pub deriver: Option<StorePath>,
    /// Opaque `keyname:base64` signatures.
    pub sigs: BTreeSet<String>,
}

impl ValidPathInfo {
    /// Metadata with nothing but the path known.
    pub fn new(path: StorePath) -> Self {
        Self {
            path,
            nar_hash: None,
            nar_size: 0,
            references: BTreeSet::new(),
            deriver: None,
            sigs: BTreeSet::new(),
        }
    }

    /// Metadata with a known NAR hash and size.
    pub fn with_nar(path: StorePath, nar_hash: Hash, nar_size: u64) -> Self {
        Self {
            nar_hash: Some(nar_hash),
            nar_size,
            ..Self::new(path)
        }
    }

    /// The canonical string that signatures are computed over.
    ///
    /// Format: `1;<path>;<algo>:<nix32 nar hash>;<nar size>;<ref1>,<ref2>,...`.
    /// References are rendered as full paths in lexicographic order, so two
    /// equal reference sets always produce the same fingerprint.
    pub fn fingerprint(&self) -> crate::Result<String> {
        let nar_hash = match &self.nar_hash {
            Some(hash) if self.nar_size != 0 => hash,
            _ => return Err(crate::Error::Fingerprint(self.path.to_string())),
        };
        let refs: Vec<&str> = self.references.iter().map(StorePath::as_str).collect();
        Ok(format!(
            "1;{};{};{};{}",
            self.path,
            nar_hash.to_typed_nix32(),
            self.nar_size,
            refs.join(",")
        ))
    }

    /// Base names of the references.
    pub fn short_refs(&self) -> Vec<&str> {
        self.references.iter().map(StorePath::base_name).collect()
    }

    /// Plain-string form for persistence and transport.
    pub fn to_record(&self) -> PathInfoRecord {
        PathInfoRecord {
            path: self.path.to_string(),
            nar_hash: self.nar_hash.as_ref().map(Hash::to_typed_nix32),
            nar_size: self.nar_size,
            references: self.references.iter().map(|r| r.to_string()).collect(),
            deriver: self.deriver.as_ref().map(|d| d.to_string()),
            sigs: self.sigs.iter().cloned().collect(),
        }
    }

    /// Rebuild from the plain-string form, validating every path against `store`.
    pub fn from_record(store: &StoreDir, record: PathInfoRecord) -> crate::Result<Self> {
        let path = store.parse_path(&record.path)?;
        let nar_hash = record
            .nar_hash
            .as_deref()
            .map(Hash::parse_typed)
            .transpose()?;
        let references = record
            .references
            .iter()
            .map(|r| store.parse_path(r))
            .collect::<crate::Result<BTreeSet<_>>>()?;
        let deriver = record
            .deriver
            .as_deref()
            .filter(|d| !d.is_empty())
            .map(|d| store.parse_path(d))
            .transpose()?;
        Ok(Self {
            path,
            nar_hash,
            nar_size: record.nar_size,
            references,
            deriver,
            sigs: record.sigs.into_iter().collect(),
        })
    }
}

/// [`ValidPathInfo`] with every field rendered as plain strings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathInfoRecord {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nar_hash: Option<String>,
    #[serde(default)]
    pub nar_size: u64,
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deriver: Option<String>,
    #[serde(default)]
    pub sigs: Vec<String>,
}
