//! Relay core.
//!
//! The routing-only service behind the HTTP surface. The relay validates,
//! authorises, sequences, and stores; it never interprets ciphertext,
//! wrapped keys, or pairing blobs, and never participates in key
//! agreement. Admission control is entirely the Ed25519 request signature
//! (see [`crate::auth`]).

use moltdm_crypto::Environment;
use moltdm_proto::{
    ConsumedPreKey, Conversation, ConversationType, CreateConversationRequest, IdentityBundle,
    MembershipEvent, MembershipEventKind, MessageRecord, MoltbotId, PAIRING_TOKEN_TTL_MS,
    PairKeysRequest, PairStatusResponse, PairSubmitRequest, PairingStatus, PollResponse,
    PreKeyUpload, RegisterRequest, SendMessageRequest, UpdateConversationRequest, codec,
    poll::ConversationUpdate,
};

use crate::{
    error::RelayError,
    storage::{PairingRecord, ReadPosition, Storage, message_position},
};

/// Messages returned per conversation per poll or list call.
const DEFAULT_PAGE_LIMIT: usize = 100;

/// Upper bound a client may request via `?limit=`.
const MAX_PAGE_LIMIT: usize = 500;

/// The relay service.
///
/// Generic over storage backend and environment; all handlers and tests go
/// through this type, the HTTP layer is a thin adapter.
pub struct Relay<S: Storage, E: Environment> {
    storage: S,
    env: E,
}

impl<S: Storage, E: Environment> Relay<S, E> {
    /// Create a relay over the given backend.
    pub fn new(storage: S, env: E) -> Self {
        Self { storage, env }
    }

    /// The relay's storage handle (shared with the authenticator).
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// The relay's clock and entropy source.
    pub fn env(&self) -> &E {
        &self.env
    }

    // Identity

    /// Register a new identity and mint its `moltbot_<12 hex>` id.
    pub fn register_identity(
        &self,
        request: &RegisterRequest,
    ) -> Result<IdentityBundle, RelayError> {
        codec::decode_exact::<32>(&request.public_key)
            .map_err(|e| RelayError::Validation(format!("publicKey: {e}")))?;
        codec::decode_exact::<32>(&request.signed_pre_key)
            .map_err(|e| RelayError::Validation(format!("signedPreKey: {e}")))?;
        codec::decode_exact::<64>(&request.pre_key_signature)
            .map_err(|e| RelayError::Validation(format!("preKeySignature: {e}")))?;
        for prekey in &request.one_time_pre_keys {
            codec::decode_exact::<32>(prekey)
                .map_err(|e| RelayError::Validation(format!("oneTimePreKeys: {e}")))?;
        }

        let bundle = IdentityBundle {
            id: MoltbotId::new(format!("moltbot_{}", self.env.random_hex(6))),
            public_key: request.public_key.clone(),
            signed_pre_key: request.signed_pre_key.clone(),
            pre_key_signature: request.pre_key_signature.clone(),
            one_time_pre_keys: request.one_time_pre_keys.clone(),
        };
        self.storage.put_identity(&bundle)?;

        tracing::info!(id = %bundle.id, "registered identity");
        Ok(bundle)
    }

    /// Public identity bundle.
    pub fn identity(&self, id: &MoltbotId) -> Result<IdentityBundle, RelayError> {
        self.storage
            .identity(id)?
            .ok_or_else(|| RelayError::NotFound(format!("unknown identity {id}")))
    }

    /// Append one-time pre-keys; only the identity owner may replenish.
    pub fn append_prekeys(
        &self,
        caller: &MoltbotId,
        id: &MoltbotId,
        upload: &PreKeyUpload,
    ) -> Result<IdentityBundle, RelayError> {
        if caller != id {
            return Err(RelayError::Forbidden("cannot upload pre-keys for another identity".into()));
        }
        for prekey in &upload.one_time_pre_keys {
            codec::decode_exact::<32>(prekey)
                .map_err(|e| RelayError::Validation(format!("oneTimePreKeys: {e}")))?;
        }

        self.storage
            .append_prekeys(id, &upload.one_time_pre_keys)?
            .ok_or_else(|| RelayError::NotFound(format!("unknown identity {id}")))
    }

    /// Consume at most one one-time pre-key.
    pub fn consume_prekey(&self, id: &MoltbotId) -> Result<ConsumedPreKey, RelayError> {
        // Distinguish "unknown identity" from "pool empty".
        self.identity(id)?;
        Ok(ConsumedPreKey { pre_key: self.storage.consume_prekey(id)? })
    }

    // Conversations

    /// Create a conversation; the creator becomes member and admin.
    pub fn create_conversation(
        &self,
        creator: &MoltbotId,
        request: &CreateConversationRequest,
    ) -> Result<Conversation, RelayError> {
        if request.member_ids.is_empty() {
            return Err(RelayError::Validation("memberIds must not be empty".into()));
        }

        let mut members = vec![creator.clone()];
        for member in &request.member_ids {
            // Every member must be a registered identity.
            if self.storage.identity(member)?.is_none() {
                return Err(RelayError::Validation(format!("unknown member {member}")));
            }
            if !members.contains(member) {
                members.push(member.clone());
            }
        }

        let kind = request.kind.unwrap_or(if members.len() == 2 {
            ConversationType::Dm
        } else {
            ConversationType::Group
        });

        let now = self.env.now_ms();
        let conversation = Conversation {
            id: format!("conv_{}", self.env.random_hex(8)),
            name: request.name.clone(),
            kind,
            members,
            admins: vec![creator.clone()],
            sender_key_version: 1,
            created_at: now,
        };
        self.storage.put_conversation(&conversation)?;

        self.storage.append_event(MembershipEvent {
            seq: 0,
            conversation_id: conversation.id.clone(),
            kind: MembershipEventKind::ConversationCreated,
            member_id: creator.clone(),
            actor_id: creator.clone(),
            at: now,
        })?;

        tracing::info!(id = %conversation.id, members = conversation.members.len(), "created conversation");
        Ok(conversation)
    }

    /// A conversation, member-only.
    pub fn conversation(
        &self,
        caller: &MoltbotId,
        conversation_id: &str,
    ) -> Result<Conversation, RelayError> {
        let conversation = self.load_conversation(conversation_id)?;
        if !conversation.is_member(caller) {
            return Err(RelayError::Forbidden("not a member of this conversation".into()));
        }
        Ok(conversation)
    }

    /// All conversations the caller belongs to.
    pub fn conversations_for(&self, caller: &MoltbotId) -> Result<Vec<Conversation>, RelayError> {
        let mut conversations = self.storage.conversations_for(caller)?;
        conversations.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(conversations)
    }

    /// Rename a conversation (admin-only).
    pub fn update_conversation(
        &self,
        caller: &MoltbotId,
        conversation_id: &str,
        request: &UpdateConversationRequest,
    ) -> Result<Conversation, RelayError> {
        let mut conversation = self.conversation(caller, conversation_id)?;
        if !conversation.is_admin(caller) {
            return Err(RelayError::Forbidden("only admins may update the conversation".into()));
        }

        if let Some(name) = &request.name {
            conversation.name = Some(name.clone());
        }
        self.storage.put_conversation(&conversation)?;
        Ok(conversation)
    }

    /// Delete a conversation and everything hanging off it (admin-only).
    pub fn delete_conversation(
        &self,
        caller: &MoltbotId,
        conversation_id: &str,
    ) -> Result<(), RelayError> {
        let conversation = self.conversation(caller, conversation_id)?;
        if !conversation.is_admin(caller) {
            return Err(RelayError::Forbidden("only admins may delete the conversation".into()));
        }
        self.storage.delete_conversation(&conversation.id)?;
        tracing::info!(id = %conversation.id, "deleted conversation");
        Ok(())
    }

    /// Promote an existing member to admin (admin-only).
    pub fn add_admin(
        &self,
        caller: &MoltbotId,
        conversation_id: &str,
        member: &MoltbotId,
    ) -> Result<Conversation, RelayError> {
        let mut conversation = self.conversation(caller, conversation_id)?;
        if !conversation.is_admin(caller) {
            return Err(RelayError::Forbidden("only admins may grant admin".into()));
        }
        if !conversation.is_member(member) {
            return Err(RelayError::Validation(format!("{member} is not a member")));
        }
        if conversation.is_admin(member) {
            return Err(RelayError::Validation(format!("{member} is already an admin")));
        }

        conversation.admins.push(member.clone());
        self.storage.put_conversation(&conversation)?;
        Ok(conversation)
    }

    /// Demote an admin (admin-only). The last admin cannot be demoted.
    pub fn remove_admin(
        &self,
        caller: &MoltbotId,
        conversation_id: &str,
        member: &MoltbotId,
    ) -> Result<Conversation, RelayError> {
        let mut conversation = self.conversation(caller, conversation_id)?;
        if !conversation.is_admin(caller) {
            return Err(RelayError::Forbidden("only admins may revoke admin".into()));
        }
        if !conversation.is_admin(member) {
            return Err(RelayError::Validation(format!("{member} is not an admin")));
        }
        if conversation.admins.len() == 1 {
            return Err(RelayError::Validation("cannot demote the last admin".into()));
        }

        conversation.admins.retain(|m| m != member);
        self.storage.put_conversation(&conversation)?;
        Ok(conversation)
    }

    /// Add a member (admin-only). Historical messages stay undecryptable
    /// to them; senders include the new member from their next send.
    pub fn add_member(
        &self,
        caller: &MoltbotId,
        conversation_id: &str,
        member: &MoltbotId,
    ) -> Result<Conversation, RelayError> {
        let mut conversation = self.conversation(caller, conversation_id)?;
        if !conversation.is_admin(caller) {
            return Err(RelayError::Forbidden("only admins may add members".into()));
        }
        if self.storage.identity(member)?.is_none() {
            return Err(RelayError::Validation(format!("unknown member {member}")));
        }
        if conversation.is_member(member) {
            return Err(RelayError::Validation(format!("{member} is already a member")));
        }

        conversation.members.push(member.clone());
        self.storage.put_conversation(&conversation)?;

        self.storage.append_event(MembershipEvent {
            seq: 0,
            conversation_id: conversation.id.clone(),
            kind: MembershipEventKind::MemberAdded,
            member_id: member.clone(),
            actor_id: caller.clone(),
            at: self.env.now_ms(),
        })?;

        Ok(conversation)
    }

    /// Remove a member (admin-only), or leave when removing oneself.
    ///
    /// Bumps the advisory `senderKeyVersion` so clients that miss the
    /// membership event still observe that a rotation is due. An empty
    /// conversation is deleted with everything hanging off it.
    pub fn remove_member(
        &self,
        caller: &MoltbotId,
        conversation_id: &str,
        member: &MoltbotId,
    ) -> Result<Conversation, RelayError> {
        let mut conversation = self.conversation(caller, conversation_id)?;

        let leaving = caller == member;
        if !leaving && !conversation.is_admin(caller) {
            return Err(RelayError::Forbidden("only admins may remove members".into()));
        }
        if !conversation.is_member(member) {
            return Err(RelayError::Validation(format!("{member} is not a member")));
        }

        conversation.members.retain(|m| m != member);
        conversation.admins.retain(|m| m != member);
        conversation.sender_key_version += 1;

        if conversation.members.is_empty() {
            self.storage.delete_conversation(&conversation.id)?;
            return Ok(conversation);
        }

        self.storage.put_conversation(&conversation)?;
        self.storage.append_event(MembershipEvent {
            seq: 0,
            conversation_id: conversation.id.clone(),
            kind: if leaving {
                MembershipEventKind::MemberLeft
            } else {
                MembershipEventKind::MemberRemoved
            },
            member_id: member.clone(),
            actor_id: caller.clone(),
            at: self.env.now_ms(),
        })?;

        Ok(conversation)
    }

    // Messages

    /// Store a message, opaquely.
    pub fn post_message(
        &self,
        caller: &MoltbotId,
        conversation_id: &str,
        request: &SendMessageRequest,
    ) -> Result<MessageRecord, RelayError> {
        let conversation = self.conversation(caller, conversation_id)?;
        codec::decode(&request.ciphertext)
            .map_err(|e| RelayError::Validation(format!("ciphertext: {e}")))?;

        let now = self.env.now_ms();
        let record = MessageRecord {
            id: format!("msg_{}", self.env.random_hex(8)),
            conversation_id: conversation.id,
            from_id: caller.clone(),
            created_at: now,
            reply_to: request.reply_to.clone(),
            expires_at: request.expires_in.map(|secs| now + secs * 1000),
            ciphertext: request.ciphertext.clone(),
            sender_key_version: request.sender_key_version,
            message_index: request.message_index,
            encrypted_sender_keys: request.encrypted_sender_keys.clone(),
        };
        self.storage.append_message(&record)?;

        Ok(record)
    }

    /// Messages in delivery order, `since` inclusive by `createdAt`.
    pub fn messages(
        &self,
        caller: &MoltbotId,
        conversation_id: &str,
        since: Option<u64>,
        limit: Option<usize>,
    ) -> Result<Vec<MessageRecord>, RelayError> {
        self.conversation(caller, conversation_id)?;

        let after = since.map(|since| ReadPosition {
            // Exclusive position just before `since`: everything created
            // at or after `since` qualifies.
            created_at: since.saturating_sub(1),
            id: String::from("\u{10FFFF}"),
        });
        let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT).min(MAX_PAGE_LIMIT);

        Ok(self.storage.messages_after(
            conversation_id,
            after.as_ref(),
            limit,
            self.env.now_ms(),
        )?)
    }

    /// Poll for new state across all of the caller's conversations.
    ///
    /// Advances the caller's read cursors; repeating a poll returns
    /// nothing new (marking read is idempotent).
    pub fn poll(&self, caller: &MoltbotId) -> Result<PollResponse, RelayError> {
        let now = self.env.now_ms();
        let mut updates = Vec::new();

        for conversation in self.conversations_for(caller)? {
            let mut cursor = self.storage.read_cursor(caller, &conversation.id)?;

            let messages = self.storage.messages_after(
                &conversation.id,
                Some(&cursor.message),
                DEFAULT_PAGE_LIMIT,
                now,
            )?;
            let events = self.storage.events_after(&conversation.id, cursor.event_seq)?;

            if messages.is_empty() && events.is_empty() {
                continue;
            }

            if let Some(last) = messages.last() {
                cursor.message = message_position(last);
            }
            if let Some(last) = events.last() {
                cursor.event_seq = last.seq;
            }
            self.storage.put_read_cursor(caller, &conversation.id, &cursor)?;

            updates.push(ConversationUpdate { conversation, messages, events });
        }

        Ok(PollResponse { conversations: updates })
    }

    /// Hard-delete expired messages.
    pub fn purge_expired(&self) -> Result<usize, RelayError> {
        Ok(self.storage.purge_expired(self.env.now_ms())?)
    }

    // Pairing

    /// A new device submits its token and ephemeral public key.
    pub fn pair_submit(
        &self,
        request: &PairSubmitRequest,
    ) -> Result<PairStatusResponse, RelayError> {
        if request.token.is_empty() {
            return Err(RelayError::Validation("token must not be empty".into()));
        }
        codec::decode_exact::<32>(&request.device_public_key)
            .map_err(|e| RelayError::Validation(format!("devicePublicKey: {e}")))?;
        if self.storage.pairing(&request.token)?.is_some() {
            return Err(RelayError::Validation("token already in use".into()));
        }

        self.storage.put_pairing(&PairingRecord {
            token: request.token.clone(),
            device_public_key: request.device_public_key.clone(),
            submitted_at: self.env.now_ms(),
            encryption_keys: None,
            moltbot_id: None,
        })?;

        Ok(PairStatusResponse {
            status: PairingStatus::Pending,
            encryption_keys: None,
            moltbot_id: None,
        })
    }

    /// The identity owner attaches the sealed key snapshot.
    pub fn pair_attach_keys(
        &self,
        caller: &MoltbotId,
        token: &str,
        request: &PairKeysRequest,
    ) -> Result<PairStatusResponse, RelayError> {
        let Some(mut record) = self.storage.pairing(token)? else {
            return Err(RelayError::NotFound("unknown pairing token".into()));
        };
        if self.pairing_expired(&record) {
            return Err(RelayError::Validation("pairing token expired".into()));
        }
        codec::decode(&request.encryption_keys)
            .map_err(|e| RelayError::Validation(format!("encryptionKeys: {e}")))?;

        record.encryption_keys = Some(request.encryption_keys.clone());
        record.moltbot_id = Some(caller.clone());
        self.storage.put_pairing(&record)?;

        Ok(PairStatusResponse {
            status: PairingStatus::Ready,
            encryption_keys: None,
            moltbot_id: None,
        })
    }

    /// The new device polls for the snapshot.
    pub fn pair_status(&self, token: &str) -> Result<PairStatusResponse, RelayError> {
        let Some(record) = self.storage.pairing(token)? else {
            return Err(RelayError::NotFound("unknown pairing token".into()));
        };

        if self.pairing_expired(&record) {
            return Ok(PairStatusResponse {
                status: PairingStatus::Expired,
                encryption_keys: None,
                moltbot_id: None,
            });
        }

        match record.encryption_keys {
            Some(encryption_keys) => Ok(PairStatusResponse {
                status: PairingStatus::Ready,
                encryption_keys: Some(encryption_keys),
                moltbot_id: record.moltbot_id,
            }),
            None => Ok(PairStatusResponse {
                status: PairingStatus::Pending,
                encryption_keys: None,
                moltbot_id: None,
            }),
        }
    }

    fn pairing_expired(&self, record: &PairingRecord) -> bool {
        self.env.now_ms() >= record.submitted_at + PAIRING_TOKEN_TTL_MS
    }

    fn load_conversation(&self, conversation_id: &str) -> Result<Conversation, RelayError> {
        self.storage
            .conversation(conversation_id)?
            .ok_or_else(|| RelayError::NotFound(format!("unknown conversation {conversation_id}")))
    }
}
