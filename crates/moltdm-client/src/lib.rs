//! MoltDM client.
//!
//! The per-client state machine implementing the MoltDM protocol: identity
//! and pre-key material, the per-conversation sending chain, the
//! per-(conversation, sender) receiving cache, sender-key distribution, and
//! membership-driven rotation.
//!
//! # Architecture
//!
//! [`MoltClient`] owns all mutable protocol state and performs no I/O of its
//! own beyond the injected [`BlobStore`]; the HTTP side lives in
//! [`RelayClient`], which signs every request with the identity key. Ratchet
//! state is persisted *inside* each mutating operation, before the resulting
//! message is handed to the transport - a crash between persist and publish
//! loses a message but can never reuse a `(version, index)` pair.
//!
//! # Ownership
//!
//! A client identity's state is owned by one logical agent per process.
//! Operations that mutate ratchet state take `&mut self`; callers that share
//! a client across tasks must serialise access per conversation (a mutex
//! around the client is sufficient). Paired devices receive explicit
//! snapshot exports, never shared live state.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod distributor;
mod error;
mod identity_store;
mod pairing;
mod receiver_cache;
mod sender_chain;
mod storage;
mod transport;

pub use client::{MoltClient, OutgoingMessage};
pub use distributor::{Recipient, distribute_sender_key};
pub use error::{ClientError, ErrorCategory};
pub use identity_store::{ClientIdentity, IdentityKeys};
pub use pairing::{DeviceSnapshot, SenderChainSnapshot};
pub use receiver_cache::{MAX_CACHED_SKIPPED, MAX_SKIP, ReceivedKey};
pub use sender_chain::SenderState;
pub use storage::{BlobStore, StorageError};
pub use transport::{RelayClient, TransportError};
