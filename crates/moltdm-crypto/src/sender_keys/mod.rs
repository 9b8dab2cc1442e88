//! Sender Keys: per-sender chains for group and 1:1 confidentiality
//!
//! Every participant owns one sending chain per conversation. Encrypting a
//! message costs one ratchet step regardless of group size; the chain's
//! initial key is distributed once per recipient via an ECDH key wrap.
//!
//! ```text
//! Initial Chain Key (random, per version)
//!        │
//!        ▼ next_chain_key (HMAC 0x02)
//! Chain Key[index]
//!        │
//!        ▼ message_key (HMAC 0x01)
//! MessageKey[index]
//!        │
//!        ▼ seal_message
//! AES-256-GCM Ciphertext
//! ```
//!
//! # Security Properties
//!
//! - Forward Secrecy: the ratchet is one-way; a chain key at index `i`
//!   cannot produce any message key at index `j < i`
//! - Key Uniqueness: each index produces a distinct message key
//! - Sender Isolation: chains are independent per sender

pub mod encryption;
pub mod error;
pub mod ratchet;
pub mod wrap;

pub use encryption::{GCM_TAG_SIZE, MESSAGE_NONCE_SIZE, open_message, seal_message};
pub use error::SenderKeyError;
pub use ratchet::{ChainKey, MessageKey, message_key, next_chain_key};
pub use wrap::{
    WRAPPED_KEY_SIZE, open_from_recipient, seal_to_recipient, unwrap_sender_key, wrap_sender_key,
};
