//! Chain ratchet for forward-secure message key derivation
//!
//! The ratchet is a pair of HMAC-SHA256 derivations over the current chain
//! key with fixed single-byte labels. The labels are part of the wire
//! protocol; any deviation breaks interop with other implementations.
//!
//! # Security Properties
//!
//! - Forward Secrecy: deriving the next chain key is one-way
//! - Key Uniqueness: each ratchet position produces a unique message key
//! - Determinism: the same chain key always produces the same outputs

use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroize;

type HmacSha256 = Hmac<Sha256>;

/// Label for deriving a message key from the chain key
const MESSAGE_KEY_LABEL: [u8; 1] = [0x01];

/// Label for deriving the next chain key
const CHAIN_KEY_LABEL: [u8; 1] = [0x02];

/// A 32-byte chain key: one position of a sender's ratchet.
///
/// Advanced with [`next_chain_key`] once per message. Zeroized on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct ChainKey([u8; 32]);

impl ChainKey {
    /// Construct a chain key from raw bytes (fresh randomness or a
    /// persisted/unwrapped key).
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes, for wrapping and persistence.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for ChainKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material never reaches logs.
        f.write_str("ChainKey(..)")
    }
}

impl Drop for ChainKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// A single-use 32-byte message key.
///
/// Used directly as the AES-256-GCM key for one message, then discarded.
/// Zeroized on drop.
#[derive(Clone)]
pub struct MessageKey([u8; 32]);

impl MessageKey {
    /// The 32-byte AES-256-GCM key.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for MessageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MessageKey(..)")
    }
}

impl Drop for MessageKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Derive the message key for the current chain position.
///
/// `messageKey(ck) = HMAC-SHA256(ck, 0x01)`
pub fn message_key(chain_key: &ChainKey) -> MessageKey {
    MessageKey(derive(chain_key, &MESSAGE_KEY_LABEL))
}

/// Derive the next chain key, advancing the ratchet one position.
///
/// `nextChainKey(ck) = HMAC-SHA256(ck, 0x02)`
pub fn next_chain_key(chain_key: &ChainKey) -> ChainKey {
    ChainKey(derive(chain_key, &CHAIN_KEY_LABEL))
}

fn derive(chain_key: &ChainKey, label: &[u8]) -> [u8; 32] {
    let Ok(mut mac) = HmacSha256::new_from_slice(&chain_key.0) else {
        unreachable!("HMAC-SHA256 accepts any key size");
    };
    mac.update(label);
    let result = mac.finalize().into_bytes();

    let mut out = [0u8; 32];
    out.copy_from_slice(&result);
    out
}
