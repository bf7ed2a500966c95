//! Webhook signature verification.
//!
//! The gateway signs the raw request body with HMAC-SHA512, keyed with the shared webhook secret, and sends the
//! hex-encoded digest in a header. Verification must run over the exact bytes received, before any JSON parsing.
use hmac::{Hmac, Mac};
use log::*;
use sha2::Sha512;
use thiserror::Error;

type HmacSha512 = Hmac<Sha512>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("No signature was provided")]
    Missing,
    #[error("The signature is not valid hex")]
    Malformed,
    #[error("The signature does not match the payload")]
    Mismatch,
}

/// Returns the lowercase hex HMAC-SHA512 of `payload`.
pub fn calculate_signature(secret: &str, payload: &[u8]) -> String {
    let mut mac = new_mac(secret);
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Checks `signature` against the HMAC of `payload`. The digest comparison is constant-time.
pub fn verify_signature(secret: &str, payload: &[u8], signature: Option<&str>) -> Result<(), SignatureError> {
    let signature = signature.map(str::trim).filter(|s| !s.is_empty()).ok_or(SignatureError::Missing)?;
    let expected = hex::decode(signature).map_err(|_| SignatureError::Malformed)?;
    let mut mac = new_mac(secret);
    mac.update(payload);
    mac.verify_slice(&expected).map_err(|_| {
        warn!("📨️ Webhook signature mismatch");
        SignatureError::Mismatch
    })
}

fn new_mac(secret: &str) -> HmacSha512 {
    // HMAC accepts keys of any length, so this cannot fail
    match HmacSha512::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC can take a key of any size"),
    }
}
