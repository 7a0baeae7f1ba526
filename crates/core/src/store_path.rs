//! Store path derivation and parsing.
//!
//! Store paths have the form `<store>/<hash>-<name>`. The hash part is the
//! nix32 rendering of a SHA-256 digest of the preimage
//! `<type>:sha256:<base16 inner hash>:<store>:<name>`, XOR-folded to
//! `hash_part_len * 5 / 8` bytes. Including the store directory and the name
//! in the preimage means neither can change without the hash part changing.
//!
//! `<type>` namespaces the provenance of the path:
//! - `text:<ref1>:<ref2>:...` for literal text added with its references,
//! - `source` for recursive SHA-256 content hashes,
//! - `output:<id>` for derivation outputs and every other fixed-output hash,
//!   whose inner hash is first wrapped as `fixed:out:<r:?><algo>:<base16>:`.
//!
//! The preimage strings are a cross-process compatibility contract and must
//! not change.

use crate::hash::{Hash, HashAlgorithm, compress_hash, hash_file, hash_path, hash_string};
use crate::nar::PathFilter;
use serde::{Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// The conventional store location.
pub const DEFAULT_STORE_DIR: &str = "/nix/store";

/// Length of the hash part in characters.
pub const DEFAULT_HASH_PART_LEN: usize = 32;

/// Symlink hops tolerated by [`StoreDir::follow_links_to_store`].
const MAX_SYMLINK_HOPS: usize = 40;

const VALID_NAME_SYMBOLS: &str = "+-._?=";

/// Check that `name` is acceptable as the name part of a store path.
///
/// The empty name is allowed; such paths consist of the hash part alone.
pub fn check_store_name(name: &str) -> crate::Result<()> {
    // Disallow "." and ".." and hidden names.
    if name.starts_with('.') {
        return Err(crate::Error::IllegalName(name.to_string()));
    }
    if let Some(ch) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || VALID_NAME_SYMBOLS.contains(*c)))
    {
        return Err(crate::Error::InvalidNameChar {
            ch,
            name: name.to_string(),
        });
    }
    Ok(())
}

fn is_nix32_char(c: char) -> bool {
    // Nix base32 alphabet: 0-9, a-d, f-n, p-s, v-z
    matches!(c, '0'..='9' | 'a'..='d' | 'f'..='n' | 'p'..='s' | 'v'..='z')
}

/// The hash part of a store path, the globally unique identity of a path.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorePathHash(String);

impl StorePathHash {
    /// Create from a string, validating length and alphabet.
    pub fn new(hash: impl Into<String>, expected_len: usize) -> crate::Result<Self> {
        let hash = hash.into();
        if hash.len() != expected_len {
            return Err(crate::Error::Parse(format!(
                "store path hash must be {expected_len} chars, got {} in '{hash}'",
                hash.len()
            )));
        }
        if let Some(c) = hash.chars().find(|c| !is_nix32_char(*c)) {
            return Err(crate::Error::Parse(format!(
                "invalid character '{c}' in store path hash '{hash}'"
            )));
        }
        Ok(Self(hash))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for StorePathHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StorePathHash({self})")
    }
}

impl fmt::Display for StorePathHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A parsed, immutable store path.
///
/// Ordering is the lexicographic order of the full path string, which is the
/// canonical order used when reference sets are rendered.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorePath {
    path: String,
    base_start: usize,
    hash_len: usize,
}

impl StorePath {
    /// The full path string.
    pub fn as_str(&self) -> &str {
        &self.path
    }

    /// The `<hash>-<name>` base name.
    pub fn base_name(&self) -> &str {
        &self.path[self.base_start..]
    }

    /// The fixed-length hash part.
    pub fn hash_part(&self) -> &str {
        &self.base_name()[..self.hash_len]
    }

    /// The hash part as a validated key.
    pub fn hash(&self) -> StorePathHash {
        StorePathHash(self.hash_part().to_string())
    }

    /// The name part, empty when the base name is just the hash.
    pub fn name(&self) -> &str {
        self.base_name().get(self.hash_len + 1..).unwrap_or("")
    }

    /// The store directory this path lives in.
    pub fn store_dir(&self) -> &str {
        &self.path[..self.base_start - 1]
    }
}

impl fmt::Debug for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StorePath({})", self.path)
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

impl AsRef<str> for StorePath {
    fn as_ref(&self) -> &str {
        &self.path
    }
}

impl Serialize for StorePath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.path)
    }
}

/// Render a set of paths for messages: `'a', 'b'`.
pub fn show_paths<'a>(paths: impl IntoIterator<Item = &'a StorePath>) -> String {
    paths
        .into_iter()
        .map(|p| format!("'{p}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// A store root together with its hash-part length; the path codec.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreDir {
    dir: String,
    hash_part_len: usize,
}

impl Default for StoreDir {
    fn default() -> Self {
        Self {
            dir: DEFAULT_STORE_DIR.to_string(),
            hash_part_len: DEFAULT_HASH_PART_LEN,
        }
    }
}

impl StoreDir {
    /// A store rooted at `dir` with the default hash-part length.
    pub fn new(dir: impl Into<String>) -> Self {
        Self {
            dir: trim_trailing_slashes(dir.into()),
            hash_part_len: DEFAULT_HASH_PART_LEN,
        }
    }

    /// A store rooted at `dir` with hash parts of `hash_part_len` characters.
    ///
    /// The length must be a positive multiple of 8 so that it maps onto a
    /// whole number of digest bytes.
    pub fn with_hash_part_len(dir: impl Into<String>, hash_part_len: usize) -> crate::Result<Self> {
        if hash_part_len == 0 || hash_part_len % 8 != 0 || hash_part_len * 5 / 8 > 32 {
            return Err(crate::Error::Parse(format!(
                "hash part length {hash_part_len} must be a multiple of 8 between 8 and 48"
            )));
        }
        Ok(Self {
            dir: trim_trailing_slashes(dir.into()),
            hash_part_len,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.dir
    }

    pub fn hash_part_len(&self) -> usize {
        self.hash_part_len
    }

    fn digest_bytes(&self) -> usize {
        self.hash_part_len * 5 / 8
    }

    /// Whether `path` lies strictly below the store directory.
    pub fn is_in_store(&self, path: &str) -> bool {
        path.len() > self.dir.len() + 1
            && path.starts_with(&self.dir)
            && path.as_bytes()[self.dir.len()] == b'/'
    }

    /// Whether `path` names a top-level store object.
    pub fn is_store_path(&self, path: &str) -> bool {
        self.parse_path(path).is_ok()
    }

    /// Fail unless `path` names a top-level store object.
    pub fn assert_store_path(&self, path: &str) -> crate::Result<()> {
        self.parse_path(path).map(|_| ())
    }

    /// Parse a top-level store path.
    pub fn parse_path(&self, path: &str) -> crate::Result<StorePath> {
        if !self.is_in_store(path) {
            return Err(crate::Error::NotInStore(path.to_string()));
        }
        let base_start = self.dir.len() + 1;
        let base = &path[base_start..];

        if base.contains('/') {
            return Err(crate::Error::invalid_path(
                path,
                "not a top-level store object",
            ));
        }
        if !base.is_ascii() {
            return Err(crate::Error::invalid_path(path, "contains non-ASCII characters"));
        }
        if base.len() < self.hash_part_len {
            return Err(crate::Error::invalid_path(path, "base name shorter than hash part"));
        }

        StorePathHash::new(&base[..self.hash_part_len], self.hash_part_len)
            .map_err(|e| crate::Error::invalid_path(path, e.to_string()))?;

        if base.len() > self.hash_part_len {
            if base.as_bytes()[self.hash_part_len] != b'-' {
                return Err(crate::Error::invalid_path(path, "expected '-' after hash part"));
            }
            check_store_name(&base[self.hash_part_len + 1..])?;
        }

        Ok(StorePath {
            path: path.to_string(),
            base_start,
            hash_len: self.hash_part_len,
        })
    }

    /// Parse a `<hash>-<name>` base name relative to this store.
    pub fn parse_base_name(&self, base_name: &str) -> crate::Result<StorePath> {
        self.parse_path(&format!("{}/{base_name}", self.dir))
    }

    /// Truncate a path inside a store object to the store object itself.
    pub fn to_store_path(&self, path: &str) -> crate::Result<StorePath> {
        if !self.is_in_store(path) {
            return Err(crate::Error::NotInStore(path.to_string()));
        }
        let top = match path[self.dir.len() + 1..].find('/') {
            Some(slash) => &path[..self.dir.len() + 1 + slash],
            None => path,
        };
        self.parse_path(top)
    }

    /// Chase symlinks from `path` until it lands inside the store.
    pub fn follow_links_to_store(&self, path: &Path) -> crate::Result<PathBuf> {
        let mut current = std::path::absolute(path)?;
        let mut hops = 0;
        while !self.is_in_store(&path_str(&current)?) {
            match fs::symlink_metadata(&current) {
                Ok(meta) if meta.file_type().is_symlink() => {}
                _ => break,
            }
            hops += 1;
            if hops > MAX_SYMLINK_HOPS {
                break;
            }
            let target = fs::read_link(&current)?;
            current = if target.is_absolute() {
                target
            } else {
                current
                    .parent()
                    .map(|parent| parent.join(&target))
                    .unwrap_or(target)
            };
        }
        if !self.is_in_store(&path_str(&current)?) {
            return Err(crate::Error::NotInStore(current.display().to_string()));
        }
        Ok(current)
    }

    /// [`follow_links_to_store`](Self::follow_links_to_store) then
    /// [`to_store_path`](Self::to_store_path).
    pub fn follow_links_to_store_path(&self, path: &Path) -> crate::Result<StorePath> {
        let resolved = self.follow_links_to_store(path)?;
        self.to_store_path(&path_str(&resolved)?)
    }

    /// The hash part of any path whose base name starts with one.
    pub fn store_path_to_hash(&self, path: &str) -> crate::Result<StorePathHash> {
        let base = base_name_of(path);
        let hash = base.get(..self.hash_part_len).ok_or_else(|| {
            crate::Error::invalid_path(path, "base name shorter than hash part")
        })?;
        StorePathHash::new(hash, self.hash_part_len)
    }

    /// The name part of a path, empty when there is none.
    pub fn store_path_to_name(&self, path: &str) -> crate::Result<String> {
        let base = base_name_of(path);
        if base.len() == self.hash_part_len {
            return Ok(String::new());
        }
        if base.len() > self.hash_part_len && base.as_bytes()[self.hash_part_len] == b'-' {
            return Ok(base[self.hash_part_len + 1..].to_string());
        }
        Err(crate::Error::invalid_path(path, "missing '-' separator after hash part"))
    }

    /// Derive a store path from a type tag, an inner SHA-256 hash and a name.
    pub fn make_store_path(&self, type_tag: &str, hash: &Hash, name: &str) -> crate::Result<StorePath> {
        check_store_name(name)?;
        if hash.algorithm() != HashAlgorithm::Sha256 {
            return Err(crate::Error::InvalidHash(format!(
                "store paths are derived from sha256 hashes, got {}",
                hash.algorithm()
            )));
        }

        // e.g. "source:sha256:1abc...:/nix/store:foo.tar.gz"
        let preimage = format!(
            "{type_tag}:sha256:{}:{}:{name}",
            hash.to_base16(),
            self.dir
        );
        let digest = hash_string(HashAlgorithm::Sha256, preimage);
        let hash_part = nix_base32::to_nix_base32(&compress_hash(&digest, self.digest_bytes()));

        let path = if name.is_empty() {
            format!("{}/{hash_part}", self.dir)
        } else {
            format!("{}/{hash_part}-{name}", self.dir)
        };
        Ok(StorePath {
            path,
            base_start: self.dir.len() + 1,
            hash_len: self.hash_part_len,
        })
    }

    /// Path of derivation output `id`; non-default outputs get `-<id>` appended to the name.
    pub fn make_output_path(&self, id: &str, hash: &Hash, name: &str) -> crate::Result<StorePath> {
        let name = if id == "out" {
            name.to_string()
        } else {
            format!("{name}-{id}")
        };
        self.make_store_path(&format!("output:{id}"), hash, &name)
    }

    /// Path of content whose hash is known in advance.
    pub fn make_fixed_output_path(
        &self,
        recursive: bool,
        hash: &Hash,
        name: &str,
    ) -> crate::Result<StorePath> {
        if recursive && hash.algorithm() == HashAlgorithm::Sha256 {
            return self.make_store_path("source", hash, name);
        }
        let wrapped = hash_string(
            HashAlgorithm::Sha256,
            format!(
                "fixed:out:{}{}:{}:",
                if recursive { "r:" } else { "" },
                hash.algorithm(),
                hash.to_base16()
            ),
        );
        self.make_store_path("output:out", &wrapped, name)
    }

    /// Hash the file or tree at `source` and compute the fixed-output path it would get.
    pub fn compute_store_path_for_path(
        &self,
        source: &Path,
        recursive: bool,
        algorithm: HashAlgorithm,
        filter: &PathFilter,
    ) -> crate::Result<(StorePath, Hash)> {
        let hash = if recursive {
            hash_path(algorithm, source, filter)?.0
        } else {
            hash_file(algorithm, source)?
        };
        let name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| crate::Error::IllegalName(source.display().to_string()))?;
        let path = self.make_fixed_output_path(recursive, &hash, name)?;
        Ok((path, hash))
    }

    /// Path of literal text with the given references.
    ///
    /// References are folded into the type tag in their canonical sorted order.
    pub fn compute_store_path_for_text(
        &self,
        name: &str,
        content: &str,
        references: &BTreeSet<StorePath>,
    ) -> crate::Result<StorePath> {
        let hash = hash_string(HashAlgorithm::Sha256, content);
        let mut type_tag = String::from("text");
        for reference in references {
            type_tag.push(':');
            type_tag.push_str(reference.as_str());
        }
        self.make_store_path(&type_tag, &hash, name)
    }
}

fn trim_trailing_slashes(mut dir: String) -> String {
    while dir.len() > 1 && dir.ends_with('/') {
        dir.pop();
    }
    dir
}

fn base_name_of(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

fn path_str(path: &Path) -> crate::Result<String> {
    path.to_str()
        .map(str::to_string)
        .ok_or_else(|| crate::Error::NotInStore(path.display().to_string()))
}
