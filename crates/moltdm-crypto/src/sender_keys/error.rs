//! Error types for Sender Keys operations

use thiserror::Error;

/// Errors from sender key operations
#[derive(Debug, Error)]
pub enum SenderKeyError {
    /// Ciphertext is too short to contain a nonce and authentication tag
    #[error("malformed ciphertext: need at least {expected} bytes, got {actual}")]
    MalformedCiphertext {
        /// Minimum length for a valid ciphertext
        expected: usize,
        /// Actual length received
        actual: usize,
    },

    /// Message decryption failed (authentication tag mismatch)
    #[error("decryption failed: {reason}")]
    DecryptionFailed {
        /// Reason for decryption failure
        reason: String,
    },

    /// Wrapped sender key blob has the wrong length
    #[error("malformed wrapped key: expected {expected} bytes, got {actual}")]
    MalformedWrap {
        /// Expected blob length
        expected: usize,
        /// Actual length received
        actual: usize,
    },

    /// Wrapped sender key failed to decrypt (wrong recipient or tampering)
    #[error("sender key unwrap failed")]
    WrapDecryptionFailed,
}

impl SenderKeyError {
    /// Returns true if this error indicates tampering or key mismatch
    /// rather than a recoverable keying gap.
    ///
    /// Integrity failures must fail the single message without advancing
    /// any ratchet state. Malformed-length errors are validation failures
    /// on untrusted input and are equally non-retryable.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, Self::DecryptionFailed { .. } | Self::WrapDecryptionFailed)
    }
}
