//! Client error types.
//!
//! Every error carries a taxonomy category so callers can route it: keying
//! failures render as an "undecryptable" placeholder and retry on the next
//! message from that sender; integrity failures fail the single message and
//! never advance ratchet state; transport failures after a send has
//! persisted lose the message but never rewind the chain.

use thiserror::Error;

use crate::storage::StorageError;

/// Error taxonomy reported alongside every client error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Missing or stale keying material; recoverable on a later message
    Keying,
    /// AEAD or signature integrity failure; treat as an active attack
    Integrity,
    /// Protocol-breaking input (past index without a cached key)
    Protocol,
    /// Identity material unusable
    Identity,
    /// Local persistence failure
    Storage,
    /// Network failure
    Transport,
    /// Malformed wire data
    Validation,
}

impl ErrorCategory {
    /// Stable tag for logs and error bodies.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Keying => "keying",
            Self::Integrity => "integrity",
            Self::Protocol => "protocol",
            Self::Identity => "identity",
            Self::Storage => "storage",
            Self::Transport => "transport",
            Self::Validation => "validation",
        }
    }
}

/// Errors from client protocol operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// No chain key for this (conversation, sender) or the wrap failed;
    /// the message surfaces as an undecryptable placeholder
    #[error("undecryptable: {reason}")]
    Undecryptable {
        /// What keying material was missing or unusable
        reason: String,
    },

    /// AEAD authentication failure on a message
    #[error("message integrity failure: {reason}")]
    Integrity {
        /// Reason reported by the AEAD layer
        reason: String,
    },

    /// Message index behind the receive chain with no cached key
    #[error("message at past index {requested}, chain is at {current}")]
    PastIndex {
        /// Next index the chain expects
        current: u32,
        /// Index the message was encrypted at
        requested: u32,
    },

    /// Message index too far ahead to ratchet to in one step
    #[error("refusing to skip {requested} ahead of {current}")]
    SkipTooLarge {
        /// Next index the chain expects
        current: u32,
        /// Index the message was encrypted at
        requested: u32,
    },

    /// Message index would overflow the chain counter
    #[error("sender chain index exhausted")]
    IndexExhausted,

    /// Identity material is unusable (e.g. loaded without the SPK private)
    #[error("identity unusable: {reason}")]
    Identity {
        /// Why the identity cannot be used
        reason: String,
    },

    /// Persistence failed; ratchet state was not advanced
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Malformed wire field (bad base64, wrong key length)
    #[error("malformed wire data: {reason}")]
    Wire {
        /// What failed to parse
        reason: String,
    },
}

impl ClientError {
    /// The taxonomy category for this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Undecryptable { .. } => ErrorCategory::Keying,
            Self::Integrity { .. } => ErrorCategory::Integrity,
            Self::PastIndex { .. } | Self::SkipTooLarge { .. } | Self::IndexExhausted => {
                ErrorCategory::Protocol
            },
            Self::Identity { .. } => ErrorCategory::Identity,
            Self::Storage(_) => ErrorCategory::Storage,
            Self::Wire { .. } => ErrorCategory::Validation,
        }
    }

    /// Whether a later message from the same sender can succeed.
    ///
    /// Keying gaps heal when the sender attaches a fresh wrap; integrity
    /// and protocol failures are final for the affected message.
    pub fn is_recoverable(&self) -> bool {
        matches!(self.category(), ErrorCategory::Keying | ErrorCategory::Transport)
    }
}

impl From<moltdm_proto::ProtoError> for ClientError {
    fn from(err: moltdm_proto::ProtoError) -> Self {
        Self::Wire { reason: err.to_string() }
    }
}
