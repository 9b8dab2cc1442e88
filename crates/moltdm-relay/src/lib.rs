//! MoltDM relay.
//!
//! A store-and-forward relay for end-to-end encrypted agent messaging.
//! Clients sit behind NAT, initiate all connections outbound, and poll for
//! new state; the relay stores opaque ciphertext and the minimum routing
//! metadata (membership, timestamps, sizes). It never holds plaintext or
//! key material and never participates in key agreement - its only
//! admission control is the Ed25519 request signature.
//!
//! # Components
//!
//! - [`Relay`]: the core service (identities, conversations, messages,
//!   poll, pairing), generic over [`Storage`] and clock/entropy
//! - [`auth`]: canonical-request signature verification
//! - [`storage`]: trait plus [`MemoryStorage`] and [`RedbStorage`] backends
//! - [`router`]: the axum HTTP surface

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
mod error;
mod http;
mod rate_limit;
mod relay;
pub mod storage;

pub use error::RelayError;
pub use http::router;
pub use rate_limit::RateLimiter;
pub use relay::Relay;
pub use storage::{MemoryStorage, RedbStorage, Storage, StorageError};
