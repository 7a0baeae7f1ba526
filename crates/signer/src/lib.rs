//! Signing and verification of store path metadata.
//!
//! This crate provides:
//! - Named ed25519 keys and public key trust sets
//! - Detached signatures over metadata fingerprints
//! - Signature counting against a trust set

pub mod error;
pub mod key;
pub mod signer;

pub use error::{SignerError, SignerResult};
pub use key::{PublicKeys, PublicKey, SecretKey};
pub use signer::{check_signature, check_signatures, sign_path_info, verify_detached};

/// Read a `name:base64` secret key from `path`.
pub fn read_secret_key(path: &std::path::Path) -> SignerResult<SecretKey> {
    SecretKey::parse(&std::fs::read_to_string(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_secret_key_trims_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key.sec");
        let key = SecretKey::generate("cache-1");
        std::fs::write(&path, format!("{}\n", key.to_nix_format())).unwrap();

        let read = read_secret_key(&path).unwrap();
        assert_eq!(read.to_public_key(), key.to_public_key());
    }
}
