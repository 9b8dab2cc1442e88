//! Relay error types.

use thiserror::Error;

use crate::storage::StorageError;

/// Errors from relay operations.
///
/// Each variant maps onto one HTTP status; the mapping lives in the HTTP
/// layer. Authentication messages stay coarse so rejections do not reveal
/// which check failed beyond what clients need ("timestamp expired" vs
/// "invalid signature").
#[derive(Debug, Error)]
pub enum RelayError {
    /// Malformed input; nothing was mutated (400)
    #[error("{0}")]
    Validation(String),

    /// Missing or failed request authentication (401)
    #[error("{0}")]
    Authentication(String),

    /// Authenticated but not allowed (non-member, non-admin) (403)
    #[error("{0}")]
    Forbidden(String),

    /// Referenced identity, conversation, or token does not exist (404)
    #[error("{0}")]
    NotFound(String),

    /// Caller exceeded the per-identity request rate (429)
    #[error("rate limit exceeded")]
    RateLimited,

    /// Storage backend failure (500)
    #[error("storage: {0}")]
    Storage(#[from] StorageError),
}

impl RelayError {
    /// Whether the relay's state may have changed before this error.
    ///
    /// All 4xx-class rejections happen before any mutation.
    pub fn mutated_state(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}
