//! Storage abstraction for the relay.
//!
//! Trait-based abstraction over the relay's persisted state: identities,
//! conversations, opaque message records, membership events, read cursors,
//! and pairing requests. The trait is synchronous; implementations share
//! internal state via `Arc`, so clones access the same underlying storage.
//!
//! The relay never stores key material beyond published public keys and the
//! opaque blobs clients hand it (ciphertexts, wrapped sender keys, sealed
//! pairing snapshots).

mod memory;
mod redb;

use moltdm_proto::{Conversation, IdentityBundle, MembershipEvent, MessageRecord, MoltbotId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use self::redb::RedbStorage;
pub use memory::MemoryStorage;

/// Errors from storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// Underlying I/O or database failure
    #[error("storage i/o: {0}")]
    Io(String),

    /// Stored bytes failed to (de)serialize
    #[error("storage serialization: {0}")]
    Serialization(String),
}

/// Position in a conversation's message stream.
///
/// Messages are ordered by `(createdAt, id)`; a position is the last record
/// seen, and reads return everything strictly after it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadPosition {
    /// `createdAt` of the last seen message
    pub created_at: u64,
    /// Id of the last seen message (tie-break)
    pub id: String,
}

/// Per-(member, conversation) read state, advanced by poll.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadCursor {
    /// Last delivered message position
    pub message: ReadPosition,
    /// Last delivered membership event seq
    pub event_seq: u64,
}

/// A pairing request as stored at the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingRecord {
    /// The caller-chosen token
    pub token: String,
    /// base64 X25519 ephemeral public from the new device
    pub device_public_key: String,
    /// Unix milliseconds of submission; tokens expire 5 minutes later
    pub submitted_at: u64,
    /// Opaque sealed snapshot, once the owner attached it
    pub encryption_keys: Option<String>,
    /// Identity that attached the keys
    pub moltbot_id: Option<MoltbotId>,
}

/// Storage abstraction for relay state.
///
/// Must be `Clone + Send + Sync` and synchronous. Message reads are ordered
/// by `(createdAt, id)` ascending; event reads by `seq` ascending.
pub trait Storage: Clone + Send + Sync + 'static {
    /// Store or replace an identity bundle.
    fn put_identity(&self, bundle: &IdentityBundle) -> Result<(), StorageError>;

    /// Load an identity bundle.
    fn identity(&self, id: &MoltbotId) -> Result<Option<IdentityBundle>, StorageError>;

    /// Append one-time pre-keys to an identity's pool.
    ///
    /// Returns the updated bundle, or `None` for an unknown identity.
    fn append_prekeys(
        &self,
        id: &MoltbotId,
        prekeys: &[String],
    ) -> Result<Option<IdentityBundle>, StorageError>;

    /// Atomically remove and return one one-time pre-key.
    ///
    /// `None` when the identity is unknown or the pool is empty. Two
    /// concurrent consumers never receive the same key.
    fn consume_prekey(&self, id: &MoltbotId) -> Result<Option<String>, StorageError>;

    /// Store or replace a conversation.
    fn put_conversation(&self, conversation: &Conversation) -> Result<(), StorageError>;

    /// Load a conversation.
    fn conversation(&self, id: &str) -> Result<Option<Conversation>, StorageError>;

    /// All conversations `member` belongs to. Order is not guaranteed.
    fn conversations_for(&self, member: &MoltbotId) -> Result<Vec<Conversation>, StorageError>;

    /// Delete a conversation and everything hanging off it (messages,
    /// events, cursors).
    fn delete_conversation(&self, id: &str) -> Result<(), StorageError>;

    /// Append a message record.
    fn append_message(&self, record: &MessageRecord) -> Result<(), StorageError>;

    /// Messages strictly after `after`, expired records filtered, at most
    /// `limit`.
    fn messages_after(
        &self,
        conversation_id: &str,
        after: Option<&ReadPosition>,
        limit: usize,
        now_ms: u64,
    ) -> Result<Vec<MessageRecord>, StorageError>;

    /// Hard-delete expired messages. Returns how many were removed.
    fn purge_expired(&self, now_ms: u64) -> Result<usize, StorageError>;

    /// Append a membership event, assigning the next `seq` for its
    /// conversation. Returns the stored event.
    fn append_event(&self, event: MembershipEvent) -> Result<MembershipEvent, StorageError>;

    /// Events with `seq` strictly greater than `after_seq`.
    fn events_after(
        &self,
        conversation_id: &str,
        after_seq: u64,
    ) -> Result<Vec<MembershipEvent>, StorageError>;

    /// A member's read cursor for a conversation (default when never set).
    fn read_cursor(
        &self,
        member: &MoltbotId,
        conversation_id: &str,
    ) -> Result<ReadCursor, StorageError>;

    /// Store a member's read cursor.
    fn put_read_cursor(
        &self,
        member: &MoltbotId,
        conversation_id: &str,
        cursor: &ReadCursor,
    ) -> Result<(), StorageError>;

    /// Store or replace a pairing record.
    fn put_pairing(&self, record: &PairingRecord) -> Result<(), StorageError>;

    /// Load a pairing record by token.
    fn pairing(&self, token: &str) -> Result<Option<PairingRecord>, StorageError>;
}

/// Ordering key for message streams.
pub(crate) fn message_position(record: &MessageRecord) -> ReadPosition {
    ReadPosition { created_at: record.created_at, id: record.id.clone() }
}

/// `(createdAt, id)` comparison used for `after` filtering.
pub(crate) fn is_after(record: &MessageRecord, after: &ReadPosition) -> bool {
    (record.created_at, record.id.as_str()) > (after.created_at, after.id.as_str())
}
