//! Detached signatures over path metadata fingerprints.

use crate::error::{SignerError, SignerResult};
use crate::key::{PublicKeys, SecretKey};
use base64::Engine;
use depot_core::path_info::ValidPathInfo;
use ed25519_dalek::Signer as _;
use ed25519_dalek::Verifier;

impl SecretKey {
    /// Sign `data`, returning `name:base64(signature)`.
    pub fn sign_detached(&self, data: &[u8]) -> String {
        let sig = self.signing_key().sign(data);
        let sig_b64 = base64::engine::general_purpose::STANDARD.encode(sig.to_bytes());
        format!("{}:{sig_b64}", self.name())
    }
}

fn decode_signature(sig_b64: &str) -> SignerResult<ed25519_dalek::Signature> {
    let sig_bytes = base64::engine::general_purpose::STANDARD
        .decode(sig_b64)
        .map_err(|e| SignerError::InvalidSignature(format!("invalid base64: {e}")))?;
    let sig_array: [u8; 64] = sig_bytes.try_into().map_err(|b: Vec<u8>| {
        SignerError::InvalidSignature(format!("expected 64 bytes, got {}", b.len()))
    })?;
    Ok(ed25519_dalek::Signature::from_bytes(&sig_array))
}

/// Check a `name:base64` signature over `data` against the key of that name.
///
/// Signatures by unknown keys and malformed signatures do not verify.
pub fn verify_detached(data: &[u8], sig: &str, keys: &PublicKeys) -> bool {
    let Some((name, sig_b64)) = sig.split_once(':') else {
        return false;
    };
    let Some(key) = keys.get(name) else {
        return false;
    };
    let Ok(signature) = decode_signature(sig_b64) else {
        return false;
    };
    key.verifying_key().verify(data, &signature).is_ok()
}

/// Sign the fingerprint of `info` and add the signature to its set.
pub fn sign_path_info(info: &mut ValidPathInfo, key: &SecretKey) -> SignerResult<()> {
    let fingerprint = info.fingerprint()?;
    info.sigs.insert(key.sign_detached(fingerprint.as_bytes()));
    Ok(())
}

/// Whether `sig` is a good signature over the fingerprint of `info`.
pub fn check_signature(info: &ValidPathInfo, keys: &PublicKeys, sig: &str) -> SignerResult<bool> {
    let fingerprint = info.fingerprint()?;
    Ok(verify_detached(fingerprint.as_bytes(), sig, keys))
}

/// Count the signatures on `info` that verify against `keys`.
///
/// The fingerprint is computed once for all signatures.
pub fn check_signatures(info: &ValidPathInfo, keys: &PublicKeys) -> SignerResult<usize> {
    let fingerprint = info.fingerprint()?;
    Ok(info
        .sigs
        .iter()
        .filter(|sig| verify_detached(fingerprint.as_bytes(), sig, keys))
        .count())
}
