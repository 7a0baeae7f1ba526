//! Typed digests and the hashing service used for store path derivation.

use crate::nar::{self, PathFilter};
use base64::Engine;
use sha2::Digest;
use std::fmt;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::str::FromStr;

/// The fixed set of supported digest algorithms.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HashAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

impl HashAlgorithm {
    /// Canonical lowercase name (`md5`, `sha1`, `sha256`, `sha512`).
    pub fn name(&self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }

    /// Digest size in bytes.
    pub fn size(&self) -> usize {
        match self {
            Self::Md5 => 16,
            Self::Sha1 => 20,
            Self::Sha256 => 32,
            Self::Sha512 => 64,
        }
    }

    fn base16_len(&self) -> usize {
        self.size() * 2
    }

    fn nix32_len(&self) -> usize {
        nix32_len(self.size())
    }

    fn base64_len(&self) -> usize {
        self.size().div_ceil(3) * 4
    }
}

impl FromStr for HashAlgorithm {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "md5" => Ok(Self::Md5),
            "sha1" => Ok(Self::Sha1),
            "sha256" => Ok(Self::Sha256),
            "sha512" => Ok(Self::Sha512),
            other => Err(crate::Error::UnknownHashAlgorithm(other.to_string())),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Length of the nix32 rendering of `bytes` bytes.
pub fn nix32_len(bytes: usize) -> usize {
    (bytes * 8).div_ceil(5)
}

/// A typed digest. Two hashes are equal iff algorithm and bytes match.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash {
    algorithm: HashAlgorithm,
    digest: Vec<u8>,
}

impl Hash {
    /// Create from raw digest bytes, checking the length against the algorithm.
    pub fn new(algorithm: HashAlgorithm, digest: impl Into<Vec<u8>>) -> crate::Result<Self> {
        let digest = digest.into();
        if digest.len() != algorithm.size() {
            return Err(crate::Error::InvalidHash(format!(
                "{algorithm} digest must be {} bytes, got {}",
                algorithm.size(),
                digest.len()
            )));
        }
        Ok(Self { algorithm, digest })
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.digest
    }

    /// Lowercase base-16 rendering.
    pub fn to_base16(&self) -> String {
        hex::encode(&self.digest)
    }

    /// Nix base-32 rendering.
    pub fn to_nix32(&self) -> String {
        nix_base32::to_nix_base32(&self.digest)
    }

    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.digest)
    }

    /// SRI rendering (`sha256-<base64>`).
    pub fn to_sri(&self) -> String {
        format!("{}-{}", self.algorithm, self.to_base64())
    }

    /// `<algo>:<nix32>` rendering used in fingerprints and registrations.
    pub fn to_typed_nix32(&self) -> String {
        format!("{}:{}", self.algorithm, self.to_nix32())
    }

    /// Parse `<algo>:<digest>` or SRI `<algo>-<base64>`.
    pub fn parse_typed(s: &str) -> crate::Result<Self> {
        if let Some((algo, digest)) = s.split_once(':') {
            return Self::parse_with_algorithm(algo.parse()?, digest);
        }
        if let Some((algo, digest)) = s.split_once('-') {
            let algorithm: HashAlgorithm = algo.parse()?;
            return Self::from_base64(algorithm, digest);
        }
        Err(crate::Error::InvalidHash(format!(
            "hash '{s}' does not state its type"
        )))
    }

    /// Parse a digest of known algorithm; the encoding is chosen by length.
    pub fn parse_with_algorithm(algorithm: HashAlgorithm, s: &str) -> crate::Result<Self> {
        let len = s.len();
        if len == algorithm.base16_len() {
            let digest = hex::decode(s)
                .map_err(|e| crate::Error::InvalidHash(format!("invalid base-16 hash '{s}': {e}")))?;
            Self::new(algorithm, digest)
        } else if len == algorithm.nix32_len() {
            let digest = nix_base32::from_nix_base32(s)
                .ok_or_else(|| crate::Error::InvalidHash(format!("invalid base-32 hash '{s}'")))?;
            Self::new(algorithm, digest)
        } else if len == algorithm.base64_len() {
            Self::from_base64(algorithm, s)
        } else {
            Err(crate::Error::InvalidHash(format!(
                "hash '{s}' has wrong length for hash type '{algorithm}'"
            )))
        }
    }

    fn from_base64(algorithm: HashAlgorithm, s: &str) -> crate::Result<Self> {
        let digest = base64::engine::general_purpose::STANDARD
            .decode(s)
            .map_err(|e| crate::Error::InvalidHash(format!("invalid base-64 hash '{s}': {e}")))?;
        Self::new(algorithm, digest)
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_typed_nix32())
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_typed_nix32())
    }
}

/// XOR-fold a digest into `new_size` bytes so every input byte contributes.
pub fn compress_hash(hash: &Hash, new_size: usize) -> Vec<u8> {
    let mut folded = vec![0u8; new_size];
    if new_size == 0 {
        return folded;
    }
    for (i, byte) in hash.as_bytes().iter().enumerate() {
        folded[i % new_size] ^= byte;
    }
    folded
}

enum HasherInner {
    Md5(md5::Md5),
    Sha1(sha1::Sha1),
    Sha256(sha2::Sha256),
    Sha512(sha2::Sha512),
}

/// Incremental hasher over any supported algorithm.
///
/// Implements [`Write`] so it can sit at the end of a NAR dump, counting the
/// bytes it has seen.
pub struct Hasher {
    inner: HasherInner,
    written: u64,
}

impl Hasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        let inner = match algorithm {
            HashAlgorithm::Md5 => HasherInner::Md5(md5::Md5::new()),
            HashAlgorithm::Sha1 => HasherInner::Sha1(sha1::Sha1::new()),
            HashAlgorithm::Sha256 => HasherInner::Sha256(sha2::Sha256::new()),
            HashAlgorithm::Sha512 => HasherInner::Sha512(sha2::Sha512::new()),
        };
        Self { inner, written: 0 }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.written += data.len() as u64;
        match &mut self.inner {
            HasherInner::Md5(h) => h.update(data),
            HasherInner::Sha1(h) => h.update(data),
            HasherInner::Sha256(h) => h.update(data),
            HasherInner::Sha512(h) => h.update(data),
        }
    }

    /// Number of bytes fed so far.
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    pub fn finish(self) -> Hash {
        let (algorithm, digest) = match self.inner {
            HasherInner::Md5(h) => (HashAlgorithm::Md5, h.finalize().to_vec()),
            HasherInner::Sha1(h) => (HashAlgorithm::Sha1, h.finalize().to_vec()),
            HasherInner::Sha256(h) => (HashAlgorithm::Sha256, h.finalize().to_vec()),
            HasherInner::Sha512(h) => (HashAlgorithm::Sha512, h.finalize().to_vec()),
        };
        Hash { algorithm, digest }
    }
}

impl Write for Hasher {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Hash an in-memory string or byte slice.
pub fn hash_string(algorithm: HashAlgorithm, data: impl AsRef<[u8]>) -> Hash {
    let mut hasher = Hasher::new(algorithm);
    hasher.update(data.as_ref());
    hasher.finish()
}

/// Flat hash of a regular file's contents.
pub fn hash_file(algorithm: HashAlgorithm, path: &Path) -> crate::Result<Hash> {
    let mut file = File::open(path)?;
    let mut hasher = Hasher::new(algorithm);
    io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finish())
}

/// Recursive hash of a filesystem object's NAR serialisation.
///
/// Returns the hash together with the NAR size in bytes.
pub fn hash_path(
    algorithm: HashAlgorithm,
    path: &Path,
    filter: &PathFilter,
) -> crate::Result<(Hash, u64)> {
    let mut hasher = Hasher::new(algorithm);
    nar::dump_path(path, filter, &mut hasher)?;
    let size = hasher.bytes_written();
    Ok((hasher.finish(), size))
}
