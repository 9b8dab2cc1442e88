//! MoltDM Cryptographic Primitives
//!
//! Cryptographic building blocks for MoltDM. Pure functions with
//! deterministic outputs. Callers provide random bytes for deterministic
//! testing.
//!
//! # Key Lifecycle
//!
//! Each sender owns one chain per conversation. The chain key is advanced
//! by an HMAC ratchet on every message, and the chain's *initial* key is
//! distributed to every recipient wrapped under an ephemeral X25519 ECDH
//! exchange against the recipient's published signed pre-key.
//!
//! ```text
//! random(32) = Initial Chain Key (per conversation, per version)
//!        │                    │
//!        ▼ HMAC(ck, 0x02)     ▼ X25519 + HKDF + AES-GCM
//! Chain Ratchet          Wrapped key per recipient
//!        │
//!        ▼ HMAC(ck, 0x01)
//! Message Key[index]
//!        │
//!        ▼ AES-256-GCM
//! Ciphertext (nonce ‖ ct ‖ tag)
//! ```
//!
//! Message keys are used for exactly one encryption operation and are
//! discarded after use. Membership changes bump the chain *version*, which
//! replaces the chain wholesale with fresh random material.
//!
//! # Security
//!
//! Forward Secrecy:
//! - Ratchet advancement: old chain keys are zeroized after deriving the next
//! - Message key disposal: keys are zeroized after single use
//! - Version rotation: a removed member never receives the new chain
//!
//! Sender Isolation:
//! - Each sender owns an independent chain; compromising one sender's chain
//!   does not expose other senders' messages
//!
//! Authenticity:
//! - AES-256-GCM provides tamper-proof encryption; failed tag -> reject
//! - Every relay request is signed with the sender's Ed25519 identity key
//!   over a canonical request string with a freshness window

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod auth;
pub mod env;
pub mod identity;
pub mod sender_keys;

pub use auth::{AuthError, SIGNATURE_FRESHNESS_WINDOW_MS};
pub use env::{Environment, SystemEnv};
pub use identity::{IdentityError, IdentityKeyPair, PreKeyPair};
pub use sender_keys::{
    ChainKey, MessageKey, SenderKeyError, message_key, next_chain_key, open_from_recipient,
    open_message, seal_message, seal_to_recipient, unwrap_sender_key, wrap_sender_key,
};
