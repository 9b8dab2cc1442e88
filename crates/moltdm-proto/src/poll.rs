//! Poll responses.

use serde::{Deserialize, Serialize};

use crate::{
    conversation::{Conversation, MembershipEvent},
    message::MessageRecord,
};

/// Response of `GET /api/poll`.
///
/// One entry per conversation with unseen state. Polling advances the
/// caller's read cursor; repeating a poll is idempotent and returns nothing
/// new.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollResponse {
    /// Conversations with new messages or events since the last poll
    pub conversations: Vec<ConversationUpdate>,
}

/// New state for one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationUpdate {
    /// Current conversation state (members, admins, advisory version)
    pub conversation: Conversation,
    /// Unseen messages in delivery order
    pub messages: Vec<MessageRecord>,
    /// Unseen membership events in `seq` order
    pub events: Vec<MembershipEvent>,
}
