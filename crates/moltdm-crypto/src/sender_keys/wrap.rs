//! Sender key distribution wrap
//!
//! Binds a 32-byte chain key to a named recipient: an ephemeral X25519
//! exchange against the recipient's published signed pre-key, HKDF-SHA256
//! to a wrap key, then AES-256-GCM over the chain key.
//!
//! Wire form (92 bytes, transported as base64):
//!
//! ```text
//! [32 bytes: ephemeral X25519 public]
//! [12 bytes: nonce]
//! [48 bytes: AES-256-GCM ciphertext of the chain key + tag]
//! ```
//!
//! The HKDF salt (32 zero bytes) and info string (`moltdm-sender-key`) are
//! part of the wire protocol.
//!
//! # Invariants
//!
//! - The ephemeral key is per-wrap, never reused
//! - The wrapped key is always the *initial* chain key for the current
//!   version, so recipients can start at index 0 regardless of when the
//!   wrap reaches them

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use hkdf::Hkdf;
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

use super::{
    encryption::{GCM_TAG_SIZE, MESSAGE_NONCE_SIZE},
    error::SenderKeyError,
    ratchet::ChainKey,
};

/// Decoded size of a wrapped sender key: 32 + 12 + 32 + 16
pub const WRAPPED_KEY_SIZE: usize = 32 + MESSAGE_NONCE_SIZE + 32 + GCM_TAG_SIZE;

/// HKDF info label binding the wrap key to this protocol
const WRAP_INFO: &[u8] = b"moltdm-sender-key";

/// HKDF salt: 32 zero bytes
const WRAP_SALT: [u8; 32] = [0u8; 32];

/// Seal an arbitrary payload to a recipient's X25519 public key.
///
/// The construction behind [`wrap_sender_key`], also used for device-pairing
/// snapshots. `ephemeral_secret` and `nonce` MUST be fresh randomness; the
/// ephemeral key exists only for this single seal.
///
/// Returns `ephemeralPub(32) ‖ nonce(12) ‖ ciphertext+tag`.
pub fn seal_to_recipient(
    recipient: &PublicKey,
    plaintext: &[u8],
    ephemeral_secret: [u8; 32],
    nonce: [u8; MESSAGE_NONCE_SIZE],
) -> Vec<u8> {
    let ephemeral = StaticSecret::from(ephemeral_secret);
    let ephemeral_pub = PublicKey::from(&ephemeral);

    let shared = ephemeral.diffie_hellman(recipient);
    let wrap_key = derive_wrap_key(shared.as_bytes());

    let Ok(cipher) = Aes256Gcm::new_from_slice(&wrap_key) else {
        unreachable!("AES-256-GCM accepts exactly 32-byte keys");
    };
    let Ok(ciphertext) = cipher.encrypt(Nonce::from_slice(&nonce), plaintext) else {
        unreachable!("AES-GCM encryption cannot fail with valid inputs");
    };

    let mut out = Vec::with_capacity(32 + MESSAGE_NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(ephemeral_pub.as_bytes());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    out
}

/// Open a blob sealed with [`seal_to_recipient`].
///
/// # Errors
///
/// - `MalformedWrap`: blob too short to contain the ephemeral key, nonce
///   and tag
/// - `WrapDecryptionFailed`: authentication failure (wrong recipient key,
///   tampering, or a blob addressed to someone else)
pub fn open_from_recipient(
    recipient_secret: &StaticSecret,
    blob: &[u8],
) -> Result<Vec<u8>, SenderKeyError> {
    let min = 32 + MESSAGE_NONCE_SIZE + GCM_TAG_SIZE;
    if blob.len() < min {
        return Err(SenderKeyError::MalformedWrap { expected: min, actual: blob.len() });
    }

    let mut ephemeral_pub = [0u8; 32];
    ephemeral_pub.copy_from_slice(&blob[..32]);
    let nonce = &blob[32..32 + MESSAGE_NONCE_SIZE];
    let ciphertext = &blob[32 + MESSAGE_NONCE_SIZE..];

    let shared = recipient_secret.diffie_hellman(&PublicKey::from(ephemeral_pub));
    let wrap_key = derive_wrap_key(shared.as_bytes());

    let Ok(cipher) = Aes256Gcm::new_from_slice(&wrap_key) else {
        unreachable!("AES-256-GCM accepts exactly 32-byte keys");
    };

    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| SenderKeyError::WrapDecryptionFailed)
}

/// Wrap a chain key for one recipient.
///
/// Returns the 92-byte `ephemeralPub ‖ nonce ‖ ciphertext` blob carried in
/// `encryptedSenderKeys`.
pub fn wrap_sender_key(
    recipient_spk: &PublicKey,
    chain_key: &ChainKey,
    ephemeral_secret: [u8; 32],
    nonce: [u8; MESSAGE_NONCE_SIZE],
) -> Vec<u8> {
    let out = seal_to_recipient(recipient_spk, chain_key.as_bytes(), ephemeral_secret, nonce);
    debug_assert_eq!(out.len(), WRAPPED_KEY_SIZE);
    out
}

/// Unwrap a chain key addressed to this recipient.
///
/// # Errors
///
/// - `MalformedWrap`: blob is not exactly 92 bytes
/// - `WrapDecryptionFailed`: authentication failure (wrong recipient key,
///   tampering, or a wrap addressed to someone else)
pub fn unwrap_sender_key(
    recipient_spk_secret: &StaticSecret,
    blob: &[u8],
) -> Result<ChainKey, SenderKeyError> {
    if blob.len() != WRAPPED_KEY_SIZE {
        return Err(SenderKeyError::MalformedWrap {
            expected: WRAPPED_KEY_SIZE,
            actual: blob.len(),
        });
    }

    let mut key_bytes = open_from_recipient(recipient_spk_secret, blob)?;

    // GCM authenticates length, so anything but 32 bytes is a blob built
    // outside this protocol.
    if key_bytes.len() != 32 {
        key_bytes.zeroize();
        return Err(SenderKeyError::WrapDecryptionFailed);
    }

    let mut chain_key = [0u8; 32];
    chain_key.copy_from_slice(&key_bytes);
    key_bytes.zeroize();

    Ok(ChainKey::from_bytes(chain_key))
}

/// `HKDF-SHA256(ikm = shared, salt = zeros(32), info = "moltdm-sender-key")`
fn derive_wrap_key(shared_secret: &[u8; 32]) -> [u8; 32] {
    let hkdf = Hkdf::<Sha256>::new(Some(&WRAP_SALT), shared_secret);

    let mut wrap_key = [0u8; 32];
    let Ok(()) = hkdf.expand(WRAP_INFO, &mut wrap_key) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };

    wrap_key
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipient() -> (StaticSecret, PublicKey) {
        let secret = StaticSecret::from([0x11; 32]);
        let public = PublicKey::from(&secret);
        (secret, public)
    }

    #[test]
    fn wrap_unwrap_roundtrip() {
        let (spk_secret, spk_public) = recipient();
        let chain_key = ChainKey::from_bytes([0x42; 32]);

        let blob = wrap_sender_key(&spk_public, &chain_key, [0x22; 32], [0x33; 12]);
        let unwrapped = unwrap_sender_key(&spk_secret, &blob).unwrap();

        assert_eq!(unwrapped.as_bytes(), chain_key.as_bytes());
    }

    #[test]
    fn blob_is_92_bytes_with_ephemeral_prefix() {
        let (_, spk_public) = recipient();
        let chain_key = ChainKey::from_bytes([0x42; 32]);

        let ephemeral_secret = [0x22; 32];
        let blob = wrap_sender_key(&spk_public, &chain_key, ephemeral_secret, [0x33; 12]);

        assert_eq!(blob.len(), WRAPPED_KEY_SIZE);
        assert_eq!(blob.len(), 92);

        let expected_pub = PublicKey::from(&StaticSecret::from(ephemeral_secret));
        assert_eq!(&blob[..32], expected_pub.as_bytes());
        assert_eq!(&blob[32..44], &[0x33; 12]);
    }

    #[test]
    fn wrong_recipient_cannot_unwrap() {
        let (_, spk_public) = recipient();
        let chain_key = ChainKey::from_bytes([0x42; 32]);

        let blob = wrap_sender_key(&spk_public, &chain_key, [0x22; 32], [0x33; 12]);

        let other_secret = StaticSecret::from([0x99; 32]);
        let result = unwrap_sender_key(&other_secret, &blob);

        assert!(matches!(result, Err(SenderKeyError::WrapDecryptionFailed)));
    }

    #[test]
    fn tampered_blob_fails() {
        let (spk_secret, spk_public) = recipient();
        let chain_key = ChainKey::from_bytes([0x42; 32]);

        let mut blob = wrap_sender_key(&spk_public, &chain_key, [0x22; 32], [0x33; 12]);
        let last = blob.len() - 1;
        blob[last] ^= 0x01;

        assert!(unwrap_sender_key(&spk_secret, &blob).is_err());
    }

    #[test]
    fn wrong_length_is_malformed() {
        let (spk_secret, _) = recipient();

        let result = unwrap_sender_key(&spk_secret, &[0u8; 91]);
        assert!(matches!(
            result,
            Err(SenderKeyError::MalformedWrap { expected: 92, actual: 91 })
        ));
    }

    #[test]
    fn seal_open_arbitrary_payload() {
        let (secret, public) = recipient();
        let payload = br#"{"moltbotId":"moltbot_a1b2c3d4e5f6"}"#;

        let blob = seal_to_recipient(&public, payload, [0x22; 32], [0x33; 12]);
        let opened = open_from_recipient(&secret, &blob).unwrap();

        assert_eq!(opened, payload);
    }

    #[test]
    fn distinct_ephemerals_produce_distinct_blobs() {
        let (_, spk_public) = recipient();
        let chain_key = ChainKey::from_bytes([0x42; 32]);

        let a = wrap_sender_key(&spk_public, &chain_key, [0x01; 32], [0x33; 12]);
        let b = wrap_sender_key(&spk_public, &chain_key, [0x02; 32], [0x33; 12]);

        assert_ne!(a, b);
    }
}
