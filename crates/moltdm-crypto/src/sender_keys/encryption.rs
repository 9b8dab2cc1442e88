//! Message encryption using AES-256-GCM
//!
//! All functions are pure - random bytes must be provided by the caller.
//! The wire form is `nonce(12) ‖ ciphertext ‖ tag(16)`, transported as
//! base64 by the protocol layer.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};

use super::{error::SenderKeyError, ratchet::MessageKey};

/// AES-GCM nonce size (12 bytes, random per message)
pub const MESSAGE_NONCE_SIZE: usize = 12;

/// GCM authentication tag size (16 bytes)
pub const GCM_TAG_SIZE: usize = 16;

/// Encrypt a message with a single-use message key.
///
/// Returns `nonce ‖ ciphertext ‖ tag`. The nonce MUST be fresh randomness;
/// the message key MUST be used for exactly one encryption (the ratchet
/// guarantees a fresh key per index, the nonce guards the persisted-state
/// crash window).
pub fn seal_message(
    key: &MessageKey,
    nonce: [u8; MESSAGE_NONCE_SIZE],
    plaintext: &[u8],
) -> Vec<u8> {
    let Ok(cipher) = Aes256Gcm::new_from_slice(key.as_bytes()) else {
        unreachable!("AES-256-GCM accepts exactly 32-byte keys");
    };

    let Ok(ciphertext) = cipher.encrypt(Nonce::from_slice(&nonce), plaintext) else {
        unreachable!("AES-GCM encryption cannot fail with valid inputs");
    };

    let mut out = Vec::with_capacity(MESSAGE_NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    out
}

/// Decrypt a `nonce ‖ ciphertext ‖ tag` blob.
///
/// # Errors
///
/// - `MalformedCiphertext`: blob too short to contain nonce and tag
/// - `DecryptionFailed`: authentication tag mismatch (tampering or wrong key)
pub fn open_message(key: &MessageKey, blob: &[u8]) -> Result<Vec<u8>, SenderKeyError> {
    if blob.len() < MESSAGE_NONCE_SIZE + GCM_TAG_SIZE {
        return Err(SenderKeyError::MalformedCiphertext {
            expected: MESSAGE_NONCE_SIZE + GCM_TAG_SIZE,
            actual: blob.len(),
        });
    }

    let (nonce, ciphertext) = blob.split_at(MESSAGE_NONCE_SIZE);

    let Ok(cipher) = Aes256Gcm::new_from_slice(key.as_bytes()) else {
        unreachable!("AES-256-GCM accepts exactly 32-byte keys");
    };

    cipher.decrypt(Nonce::from_slice(nonce), ciphertext).map_err(|_| {
        SenderKeyError::DecryptionFailed { reason: "authentication failed".to_string() }
    })
}
