//! Base64 helpers for binary wire fields.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use thiserror::Error;

/// Errors from wire field decoding
#[derive(Debug, Error)]
pub enum ProtoError {
    /// Field was not valid base64
    #[error("invalid base64: {0}")]
    InvalidBase64(String),

    /// Decoded field had the wrong length
    #[error("wrong field length: expected {expected} bytes, got {actual}")]
    WrongLength {
        /// Expected decoded length
        expected: usize,
        /// Actual decoded length
        actual: usize,
    },
}

/// Encode bytes as standard base64.
pub fn encode(bytes: impl AsRef<[u8]>) -> String {
    BASE64.encode(bytes)
}

/// Decode a standard-base64 field.
pub fn decode(value: &str) -> Result<Vec<u8>, ProtoError> {
    BASE64.decode(value).map_err(|e| ProtoError::InvalidBase64(e.to_string()))
}

/// Decode a base64 field that must be exactly `N` bytes (keys, signatures).
pub fn decode_exact<const N: usize>(value: &str) -> Result<[u8; N], ProtoError> {
    let bytes = decode(value)?;
    let actual = bytes.len();
    bytes.try_into().map_err(|_| ProtoError::WrongLength { expected: N, actual })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let bytes = [7u8; 32];
        assert_eq!(decode_exact::<32>(&encode(bytes)).unwrap(), bytes);
    }

    #[test]
    fn rejects_bad_base64() {
        assert!(matches!(decode("***"), Err(ProtoError::InvalidBase64(_))));
    }

    #[test]
    fn rejects_wrong_length() {
        let short = encode([0u8; 16]);
        assert!(matches!(
            decode_exact::<32>(&short),
            Err(ProtoError::WrongLength { expected: 32, actual: 16 })
        ));
    }
}
