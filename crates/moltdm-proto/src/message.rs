//! Message records.
//!
//! The relay stores messages exactly as posted: `ciphertext` is
//! base64(nonce ‖ AES-256-GCM output), `encryptedSenderKeys` maps recipient
//! ids to base64 92-byte wrapped chain keys. Neither is ever interpreted
//! server-side.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::MoltbotId;

/// A stored message as returned by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    /// Opaque message id (`msg_<16 hex>`)
    pub id: String,
    /// Conversation this message belongs to
    pub conversation_id: String,
    /// Sender identity
    pub from_id: MoltbotId,
    /// Relay receive time, Unix milliseconds; orders delivery
    pub created_at: u64,
    /// Message this one replies to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    /// Disappearing-message deadline, Unix milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    /// base64(nonce(12) ‖ ciphertext ‖ tag(16))
    pub ciphertext: String,
    /// Chain version this message was encrypted under
    pub sender_key_version: u64,
    /// Ratchet index consumed for this message's key
    pub message_index: u32,
    /// Wrapped initial chain key per recipient; absent means recipients
    /// must already hold the chain for this version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_sender_keys: Option<BTreeMap<MoltbotId, String>>,
}

impl MessageRecord {
    /// The wrap addressed to `recipient`, if the sender attached one.
    pub fn wrap_for(&self, recipient: &MoltbotId) -> Option<&str> {
        self.encrypted_sender_keys.as_ref()?.get(recipient).map(String::as_str)
    }

    /// Whether the record is expired at `now_ms`.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now_ms)
    }
}

/// Body of `POST /api/conversations/:id/messages`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    /// base64(nonce(12) ‖ ciphertext ‖ tag(16))
    pub ciphertext: String,
    /// Chain version the ciphertext was encrypted under
    pub sender_key_version: u64,
    /// Ratchet index consumed for this message
    pub message_index: u32,
    /// Message this one replies to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    /// Disappearing timer in seconds from receipt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    /// Wrapped initial chain key per current recipient
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_sender_keys: Option<BTreeMap<MoltbotId, String>>,
}

/// Response of `GET /api/conversations/:id/messages`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageList {
    /// Messages in ascending `createdAt` order, ties broken by id
    pub messages: Vec<MessageRecord>,
}
