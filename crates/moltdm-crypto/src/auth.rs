//! Request authentication
//!
//! Every authenticated relay call is signed with the caller's Ed25519
//! identity key over a canonical request string:
//!
//! ```text
//! "{timestamp}:{METHOD}:{path}:{bodyHash}"
//! ```
//!
//! - `timestamp` is Unix milliseconds as a decimal string
//! - `METHOD` is the upper-case HTTP verb
//! - `path` is the raw URL-encoded path, percent-encoding preserved
//!   (reaction paths carry percent-encoded emoji)
//! - `bodyHash` is the empty string for bodyless requests, else the
//!   lowercase hex SHA-256 of the raw body bytes
//!
//! The relay accepts a signature only within a ±5 minute freshness window;
//! there is no nonce cache, so idempotent requests may be replayed inside
//! the window by design.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::identity::IdentityKeyPair;

/// Signature freshness window: 5 minutes either side of relay time.
pub const SIGNATURE_FRESHNESS_WINDOW_MS: u64 = 5 * 60 * 1000;

/// Errors from request authentication
#[derive(Debug, Error)]
pub enum AuthError {
    /// Timestamp outside the freshness window
    #[error("timestamp expired")]
    StaleTimestamp,

    /// Signature did not decode as base64 Ed25519
    #[error("malformed signature")]
    MalformedSignature,

    /// Signature did not verify over the canonical request
    #[error("invalid signature")]
    InvalidSignature,
}

/// Hash a request body for the canonical string.
///
/// Returns the empty string for an empty body - literally empty, not the
/// hash of zero bytes. Otherwise the lowercase hex SHA-256 of the raw
/// bytes.
pub fn body_hash(body: &[u8]) -> String {
    if body.is_empty() {
        return String::new();
    }

    let digest = Sha256::digest(body);

    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Build the canonical string for signing and verification.
///
/// Both sides must produce byte-identical output; the method is upper-cased
/// here so callers cannot disagree on verb case.
pub fn canonical_request(timestamp_ms: u64, method: &str, path: &str, body: &[u8]) -> String {
    format!("{timestamp_ms}:{}:{path}:{}", method.to_ascii_uppercase(), body_hash(body))
}

/// Sign a request, returning the base64 signature for `X-Signature`.
pub fn sign_request(
    identity: &IdentityKeyPair,
    timestamp_ms: u64,
    method: &str,
    path: &str,
    body: &[u8],
) -> String {
    let canonical = canonical_request(timestamp_ms, method, path, body);
    BASE64.encode(identity.sign(canonical.as_bytes()).to_bytes())
}

/// Check a request timestamp against the freshness window.
pub fn check_freshness(timestamp_ms: u64, now_ms: u64) -> Result<(), AuthError> {
    if now_ms.abs_diff(timestamp_ms) > SIGNATURE_FRESHNESS_WINDOW_MS {
        return Err(AuthError::StaleTimestamp);
    }
    Ok(())
}

/// Verify a request signature against the caller's identity public key.
///
/// Does not check freshness; call [`check_freshness`] first so the two
/// rejections stay distinguishable in relay logs.
pub fn verify_request(
    identity_public: &VerifyingKey,
    timestamp_ms: u64,
    method: &str,
    path: &str,
    body: &[u8],
    signature_b64: &str,
) -> Result<(), AuthError> {
    let signature_bytes = BASE64.decode(signature_b64).map_err(|_| AuthError::MalformedSignature)?;
    let signature =
        Signature::from_slice(&signature_bytes).map_err(|_| AuthError::MalformedSignature)?;

    let canonical = canonical_request(timestamp_ms, method, path, body);

    identity_public
        .verify(canonical.as_bytes(), &signature)
        .map_err(|_| AuthError::InvalidSignature)
}
