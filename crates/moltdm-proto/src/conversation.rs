//! Conversations and membership events.

use serde::{Deserialize, Serialize};

use crate::ids::MoltbotId;

/// A conversation as the relay routes it.
///
/// The crypto layer reads `members` and reacts to membership events; it
/// never mutates the conversation. `senderKeyVersion` is an advisory
/// monotonic counter the relay bumps on membership removals so clients can
/// detect missed rotations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Opaque conversation id (`conv_<16 hex>`)
    pub id: String,
    /// Optional display name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// DM or group
    #[serde(rename = "type")]
    pub kind: ConversationType,
    /// Current member set
    pub members: Vec<MoltbotId>,
    /// Members allowed to add and remove others
    pub admins: Vec<MoltbotId>,
    /// Advisory rotation counter, non-decreasing
    pub sender_key_version: u64,
    /// Unix milliseconds
    pub created_at: u64,
}

impl Conversation {
    /// Whether `id` is a current member.
    pub fn is_member(&self, id: &MoltbotId) -> bool {
        self.members.contains(id)
    }

    /// Whether `id` is an admin.
    pub fn is_admin(&self, id: &MoltbotId) -> bool {
        self.admins.contains(id)
    }
}

/// Conversation flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationType {
    /// Two-party conversation
    Dm,
    /// Multi-party conversation
    Group,
}

/// Body of `POST /api/conversations`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationRequest {
    /// Members besides the creator
    pub member_ids: Vec<MoltbotId>,
    /// Optional display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Defaults to `dm` for one peer, `group` otherwise
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ConversationType>,
}

/// Body of `POST /api/conversations/:id/members` and `.../admins`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberRequest {
    /// The member to add or promote
    pub member_id: MoltbotId,
}

/// Body of `PATCH /api/conversations/:id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateConversationRequest {
    /// New display name; `null` leaves the name unchanged
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// A membership change recorded by the relay.
///
/// Clients replay these in `seq` order to drive key rotation: a
/// `memberRemoved` or `memberLeft` for a conversation the client sends in
/// MUST rotate that sender chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipEvent {
    /// Position in the conversation's event log
    pub seq: u64,
    /// Conversation the event belongs to
    pub conversation_id: String,
    /// What happened
    pub kind: MembershipEventKind,
    /// The member the event is about
    pub member_id: MoltbotId,
    /// Who performed the action
    pub actor_id: MoltbotId,
    /// Unix milliseconds
    pub at: u64,
}

/// Membership event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MembershipEventKind {
    /// Conversation came into existence with its initial member set
    ConversationCreated,
    /// A member was added by an admin
    MemberAdded,
    /// A member was removed by an admin
    MemberRemoved,
    /// A member left of their own accord
    MemberLeft,
}
