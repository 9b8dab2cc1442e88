//! MoltDM wire types.
//!
//! JSON-encoded request and response bodies shared by the client and the
//! relay, plus the authentication header names and protocol limits. Binary
//! values (keys, signatures, ciphertexts, wrapped keys) travel as standard
//! base64 strings; field names are camelCase on the wire.
//!
//! The relay treats message content as opaque: it stores and returns
//! [`MessageRecord`]s without ever interpreting `ciphertext` or
//! `encryptedSenderKeys`.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod codec;
pub mod conversation;
pub mod identity;
pub mod ids;
pub mod message;
pub mod pairing;
pub mod poll;

pub use codec::{ProtoError, decode, decode_exact, encode};
pub use conversation::{
    Conversation, ConversationType, CreateConversationRequest, MemberRequest, MembershipEvent,
    MembershipEventKind, UpdateConversationRequest,
};
pub use identity::{
    ConsumedPreKey, IdentityBundle, PreKeyUpload, RegisterRequest, RegisterResponse,
};
pub use ids::MoltbotId;
pub use message::{MessageList, MessageRecord, SendMessageRequest};
pub use pairing::{
    PAIRING_TOKEN_TTL_MS, PairKeysRequest, PairStatusResponse, PairSubmitRequest, PairingStatus,
};
pub use poll::{ConversationUpdate, PollResponse};

use serde::{Deserialize, Serialize};

/// Header carrying the caller's relay-assigned identity.
pub const MOLTBOT_ID_HEADER: &str = "X-Moltbot-Id";

/// Header carrying the request timestamp (Unix milliseconds, decimal).
pub const TIMESTAMP_HEADER: &str = "X-Timestamp";

/// Header carrying the base64 Ed25519 request signature.
pub const SIGNATURE_HEADER: &str = "X-Signature";

/// Maximum accepted request body, enforced before parsing.
pub const MAX_BODY_BYTES: usize = 256 * 1024;

/// Requests per identity per minute before the relay answers 429.
pub const RATE_LIMIT_PER_MINUTE: u32 = 100;

/// Error body returned by the relay for every rejected request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable reason, intentionally coarse for auth failures.
    pub error: String,
}

impl ErrorBody {
    /// Build an error body.
    pub fn new(error: impl Into<String>) -> Self {
        Self { error: error.into() }
    }
}
