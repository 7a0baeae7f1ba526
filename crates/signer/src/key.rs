//! Named ed25519 keys in `name:base64` form.

use crate::error::{SignerError, SignerResult};
use base64::Engine;
use ed25519_dalek::{SigningKey, VerifyingKey};
use std::collections::BTreeMap;
use std::fmt;

fn split_key(s: &str) -> SignerResult<(&str, Vec<u8>)> {
    let (name, b64) = s
        .trim()
        .split_once(':')
        .ok_or_else(|| SignerError::KeyParsing("expected 'keyname:base64' format".to_string()))?;
    if name.is_empty() {
        return Err(SignerError::KeyParsing("key name is empty".to_string()));
    }
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(b64)
        .map_err(|e| SignerError::KeyParsing(format!("invalid base64: {e}")))?;
    Ok((name, bytes))
}

/// A named secret key.
///
/// The encoded form carries the 32-byte seed followed by the public key,
/// 64 bytes in total.
pub struct SecretKey {
    name: String,
    inner: SigningKey,
}

impl SecretKey {
    /// Generate a new random key called `name`.
    pub fn generate(name: impl Into<String>) -> Self {
        let mut rng = rand_core::OsRng;
        Self {
            name: name.into(),
            inner: SigningKey::generate(&mut rng),
        }
    }

    pub fn parse(s: &str) -> SignerResult<Self> {
        let (name, bytes) = split_key(s)?;
        if bytes.len() != 64 {
            return Err(SignerError::KeyParsing(format!(
                "secret key '{name}' must be 64 bytes, got {}",
                bytes.len()
            )));
        }
        let seed: [u8; 32] = bytes[..32]
            .try_into()
            .map_err(|_| SignerError::KeyParsing("invalid secret key bytes".to_string()))?;
        let inner = SigningKey::from_bytes(&seed);
        if inner.verifying_key().as_bytes() != &bytes[32..] {
            return Err(SignerError::KeyParsing(format!(
                "secret key '{name}' does not match its embedded public key"
            )));
        }
        Ok(Self {
            name: name.to_string(),
            inner,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Encode as `name:base64(seed || public)`.
    pub fn to_nix_format(&self) -> String {
        let mut bytes = Vec::with_capacity(64);
        bytes.extend_from_slice(self.inner.as_bytes());
        bytes.extend_from_slice(self.inner.verifying_key().as_bytes());
        let b64 = base64::engine::general_purpose::STANDARD.encode(&bytes);
        format!("{}:{b64}", self.name)
    }

    pub fn to_public_key(&self) -> PublicKey {
        PublicKey {
            name: self.name.clone(),
            inner: self.inner.verifying_key(),
        }
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.inner
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretKey({}, [REDACTED])", self.name)
    }
}

/// A named public key.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    name: String,
    inner: VerifyingKey,
}

impl PublicKey {
    pub fn parse(s: &str) -> SignerResult<Self> {
        let (name, bytes) = split_key(s)?;
        let key_bytes: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| {
            SignerError::KeyParsing(format!(
                "public key '{name}' must be 32 bytes, got {}",
                b.len()
            ))
        })?;
        let inner = VerifyingKey::from_bytes(&key_bytes)
            .map_err(|e| SignerError::KeyParsing(format!("invalid public key '{name}': {e}")))?;
        Ok(Self {
            name: name.to_string(),
            inner,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn to_nix_format(&self) -> String {
        let b64 = base64::engine::general_purpose::STANDARD.encode(self.inner.as_bytes());
        format!("{}:{b64}", self.name)
    }

    pub(crate) fn verifying_key(&self) -> &VerifyingKey {
        &self.inner
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_nix_format())
    }
}

/// A trust set of public keys, indexed by name.
#[derive(Clone, Debug, Default)]
pub struct PublicKeys {
    keys: BTreeMap<String, PublicKey>,
}

impl PublicKeys {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse every `name:base64` string in `keys`.
    pub fn parse<'a>(keys: impl IntoIterator<Item = &'a str>) -> SignerResult<Self> {
        let mut set = Self::new();
        for key in keys {
            set.insert(PublicKey::parse(key)?);
        }
        Ok(set)
    }

    /// Add `key`, replacing any key with the same name.
    pub fn insert(&mut self, key: PublicKey) {
        self.keys.insert(key.name.clone(), key);
    }

    pub fn get(&self, name: &str) -> Option<&PublicKey> {
        self.keys.get(name)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl FromIterator<PublicKey> for PublicKeys {
    fn from_iter<I: IntoIterator<Item = PublicKey>>(iter: I) -> Self {
        let mut set = Self::new();
        for key in iter {
            set.insert(key);
        }
        set
    }
}
