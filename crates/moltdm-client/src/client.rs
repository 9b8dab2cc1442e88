//! Client state machine.
//!
//! [`MoltClient`] owns the per-conversation sending chains and the
//! per-(conversation, sender) receiving caches for one identity, and turns
//! plaintext into wire messages and back.
//!
//! State is persisted through the injected [`BlobStore`] inside each
//! mutating operation: a send persists the advanced chain *before* the
//! ciphertext is returned to the caller, so a crash between persist and
//! publish loses a message but never re-burns a `(version, index)` pair.

use std::collections::{BTreeMap, HashMap};

use moltdm_crypto::{
    ChainKey, Environment, IdentityKeyPair, PreKeyPair, SenderKeyError, auth,
    identity::x25519_public_from_bytes, open_from_recipient, open_message, seal_message,
    seal_to_recipient, unwrap_sender_key,
};
use moltdm_proto::{
    MembershipEvent, MembershipEventKind, MessageRecord, MoltbotId, SendMessageRequest, codec,
};
use x25519_dalek::StaticSecret;

use crate::{
    distributor::{Recipient, distribute_sender_key},
    error::ClientError,
    identity_store::{ClientIdentity, IdentityKeys},
    pairing::{DeviceSnapshot, SenderChainSnapshot},
    receiver_cache::ReceivedKey,
    sender_chain::SenderState,
    storage::BlobStore,
};

/// An encrypted message ready for the relay.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    /// base64(nonce ‖ ciphertext ‖ tag)
    pub ciphertext: String,
    /// Chain version the message was encrypted under
    pub sender_key_version: u64,
    /// Index consumed for this message's key
    pub message_index: u32,
    /// Wrapped initial chain key per reachable recipient
    pub encrypted_sender_keys: BTreeMap<MoltbotId, String>,
}

impl OutgoingMessage {
    /// Build the relay request body.
    pub fn into_request(
        self,
        reply_to: Option<String>,
        expires_in: Option<u64>,
    ) -> SendMessageRequest {
        SendMessageRequest {
            ciphertext: self.ciphertext,
            sender_key_version: self.sender_key_version,
            message_index: self.message_index,
            reply_to,
            expires_in,
            encrypted_sender_keys: (!self.encrypted_sender_keys.is_empty())
                .then_some(self.encrypted_sender_keys),
        }
    }
}

/// Per-identity protocol state machine.
///
/// Single-owner: operations that mutate ratchet state take `&mut self`.
/// Callers sharing one client across tasks must serialise access; two
/// concurrent sends on one conversation would consume the same
/// `(version, index)` pair.
pub struct MoltClient<E: Environment> {
    env: E,
    store: BlobStore,
    identity: ClientIdentity,
    sender: HashMap<String, SenderState>,
    received: HashMap<String, HashMap<MoltbotId, ReceivedKey>>,
}

impl<E: Environment> MoltClient<E> {
    /// Wrap an identity and its backing store.
    pub fn new(env: E, store: BlobStore, identity: ClientIdentity) -> Self {
        Self { env, store, identity, sender: HashMap::new(), received: HashMap::new() }
    }

    /// Load the identity persisted in `store`, if any.
    pub fn open(env: E, store: BlobStore) -> Result<Option<Self>, ClientError> {
        let Some(identity) = ClientIdentity::load(&store)? else {
            return Ok(None);
        };
        Ok(Some(Self::new(env, store, identity)))
    }

    /// This client's routing identity.
    pub fn moltbot_id(&self) -> &MoltbotId {
        &self.identity.moltbot_id
    }

    /// The identity record (keys, pre-key material).
    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    /// Mutable identity access (pre-key replenishment).
    pub fn identity_mut(&mut self) -> &mut ClientIdentity {
        &mut self.identity
    }

    /// Sign a relay request with this identity.
    pub fn sign_request(&self, timestamp_ms: u64, method: &str, path: &str, body: &[u8]) -> String {
        auth::sign_request(self.identity.identity_keys(), timestamp_ms, method, path, body)
    }

    /// Current time from the injected environment.
    pub fn now_ms(&self) -> u64 {
        self.env.now_ms()
    }

    /// Encrypt one message for a conversation.
    ///
    /// `recipients` is the conversation's *current* member set including
    /// this client (the self-wrap is what lets paired devices decrypt).
    /// Creates the sending chain on first use; persists the advanced chain
    /// before returning.
    pub fn encrypt_message(
        &mut self,
        conversation_id: &str,
        recipients: &[Recipient],
        plaintext: &[u8],
    ) -> Result<OutgoingMessage, ClientError> {
        self.load_sender(conversation_id)?;

        let mut state = match self.sender.get(conversation_id) {
            Some(state) => state.clone(),
            None => SenderState::new(&self.env),
        };

        let (key, used_index) = state.next_message_key()?;
        let sealed = seal_message(&key, self.env.random_array(), plaintext);
        let wraps = distribute_sender_key(&self.env, state.initial_chain_key(), recipients);

        let version = state.version();

        // The chain must be durable before the ciphertext can reach the
        // wire; a resend after a crash must never reuse this index.
        self.persist_sender(conversation_id, &state)?;
        self.sender.insert(conversation_id.to_string(), state);

        Ok(OutgoingMessage {
            ciphertext: codec::encode(sealed),
            sender_key_version: version,
            message_index: used_index,
            encrypted_sender_keys: wraps,
        })
    }

    /// Decrypt a message record addressed to this client.
    ///
    /// Installs a wrapped sender key when the record carries a strictly
    /// newer version for us; ratchets the receive chain to the record's
    /// index; persists only after the AEAD opens. Keying gaps surface as
    /// [`ClientError::Undecryptable`] so callers can render a placeholder
    /// without losing state.
    pub fn decrypt_message(&mut self, record: &MessageRecord) -> Result<Vec<u8>, ClientError> {
        let conversation_id = record.conversation_id.as_str();
        self.load_received(conversation_id)?;

        let existing = self
            .received
            .get(conversation_id)
            .and_then(|senders| senders.get(&record.from_id));
        let mut working = existing.cloned();

        if let Some(wrap_b64) = record.wrap_for(&self.identity.moltbot_id) {
            let newer = working
                .as_ref()
                .is_none_or(|rk| record.sender_key_version > rk.version());
            if newer {
                let chain = self.unwrap_chain(wrap_b64)?;
                match &mut working {
                    Some(rk) => rk.replace_chain(chain, record.sender_key_version),
                    None => working = Some(ReceivedKey::install(chain, record.sender_key_version)),
                }
            }
        }

        let Some(mut rk) = working else {
            // Expected when we joined after this message was sent, or the
            // sender predates key distribution.
            return Err(ClientError::Undecryptable {
                reason: format!("no sender key from {} in {conversation_id}", record.from_id),
            });
        };

        let key = rk.message_key_for(record.sender_key_version, record.message_index)?;

        let sealed = codec::decode(&record.ciphertext)?;
        let plaintext = open_message(&key, &sealed).map_err(|e| match e {
            SenderKeyError::MalformedCiphertext { .. } => {
                ClientError::Wire { reason: e.to_string() }
            },
            _ => ClientError::Integrity { reason: "authentication failed".to_string() },
        })?;

        // Commit only now: a failed open must not advance the chain.
        self.received
            .entry(conversation_id.to_string())
            .or_default()
            .insert(record.from_id.clone(), rk);
        self.persist_received(conversation_id)?;

        Ok(plaintext)
    }

    /// Receiving position for one sender: `(version, next expected index)`.
    ///
    /// `None` until a wrap from that sender has been installed.
    pub fn receiver_position(
        &mut self,
        conversation_id: &str,
        from: &MoltbotId,
    ) -> Result<Option<(u64, u32)>, ClientError> {
        self.load_received(conversation_id)?;
        Ok(self
            .received
            .get(conversation_id)
            .and_then(|senders| senders.get(from))
            .map(|rk| (rk.version(), rk.message_index())))
    }

    /// Rotate the sending chain for a conversation.
    ///
    /// No-op when this client has never sent there: the first send creates
    /// a fresh chain that only the then-current members receive.
    pub fn rotate_sender_chain(&mut self, conversation_id: &str) -> Result<(), ClientError> {
        self.load_sender(conversation_id)?;

        let Some(state) = self.sender.get_mut(conversation_id) else {
            return Ok(());
        };

        state.rotate(&self.env);
        let state = state.clone();
        self.persist_sender(conversation_id, &state)?;

        tracing::debug!(conversation_id, version = state.version(), "rotated sender chain");
        Ok(())
    }

    /// React to a membership change.
    ///
    /// A peer leaving or being removed rotates our chain so the next send
    /// excludes them; our own departure destroys all local state for the
    /// conversation. Additions need nothing: the next send wraps for them.
    pub fn handle_membership_event(&mut self, event: &MembershipEvent) -> Result<(), ClientError> {
        match event.kind {
            MembershipEventKind::MemberRemoved | MembershipEventKind::MemberLeft => {
                if event.member_id == self.identity.moltbot_id {
                    self.destroy_conversation_state(&event.conversation_id)
                } else {
                    self.rotate_sender_chain(&event.conversation_id)
                }
            },
            MembershipEventKind::MemberAdded | MembershipEventKind::ConversationCreated => Ok(()),
        }
    }

    /// Forget all chain state for a conversation (self left or was
    /// removed).
    pub fn destroy_conversation_state(&mut self, conversation_id: &str) -> Result<(), ClientError> {
        self.sender.remove(conversation_id);
        self.received.remove(conversation_id);
        self.store.delete(&sender_store_key(conversation_id))?;
        self.store.delete(&received_store_key(conversation_id))?;
        Ok(())
    }

    /// Export the pairing snapshot for a new device.
    ///
    /// `conversation_ids` is the set of conversations this identity sends
    /// in (from the relay's conversation list); chains that exist are
    /// exported at their current position.
    pub fn export_snapshot(
        &mut self,
        conversation_ids: &[String],
    ) -> Result<DeviceSnapshot, ClientError> {
        let mut sender_chains = BTreeMap::new();

        for conversation_id in conversation_ids {
            self.load_sender(conversation_id)?;
            if let Some(state) = self.sender.get(conversation_id) {
                sender_chains.insert(
                    conversation_id.clone(),
                    SenderChainSnapshot {
                        initial_chain_key: codec::encode(state.initial_chain_key().as_bytes()),
                        chain_key: codec::encode(state.chain_key().as_bytes()),
                        version: state.version(),
                        message_index: state.message_index(),
                    },
                );
            }
        }

        Ok(DeviceSnapshot {
            moltbot_id: self.identity.moltbot_id.clone(),
            identity_private: codec::encode(self.identity.identity_keys().secret_bytes()),
            signed_pre_key_private: codec::encode(self.identity.signed_pre_key().secret_bytes()),
            signed_pre_key_signature: codec::encode(self.identity.spk_signature()),
            sender_chains,
        })
    }

    /// Seal a snapshot to a new device's ephemeral X25519 public key.
    ///
    /// Same ECDH + HKDF + AEAD construction as sender-key wraps; the relay
    /// stores only the resulting opaque blob.
    pub fn seal_snapshot(
        &self,
        snapshot: &DeviceSnapshot,
        device_public_b64: &str,
    ) -> Result<String, ClientError> {
        let device_public =
            x25519_public_from_bytes(&codec::decode(device_public_b64)?).map_err(|e| {
                ClientError::Wire { reason: format!("device public key: {e}") }
            })?;

        let payload = serde_json::to_vec(snapshot)
            .map_err(|e| ClientError::Wire { reason: e.to_string() })?;

        let blob = seal_to_recipient(
            &device_public,
            &payload,
            self.env.random_array(),
            self.env.random_array(),
        );
        Ok(codec::encode(blob))
    }

    /// Open a sealed snapshot on the new device.
    pub fn open_snapshot(
        device_secret: &StaticSecret,
        sealed_b64: &str,
    ) -> Result<DeviceSnapshot, ClientError> {
        let blob = codec::decode(sealed_b64)?;
        let payload = open_from_recipient(device_secret, &blob).map_err(|e| {
            match e {
                SenderKeyError::MalformedWrap { .. } => {
                    ClientError::Wire { reason: e.to_string() }
                },
                _ => ClientError::Undecryptable {
                    reason: "pairing snapshot unwrap failed".to_string(),
                },
            }
        })?;

        serde_json::from_slice(&payload)
            .map_err(|e| ClientError::Wire { reason: format!("pairing snapshot: {e}") })
    }

    /// Build a client from an installed snapshot and persist everything.
    ///
    /// The paired device holds the same identity and SPK privates and takes
    /// over every exported chain at its current position.
    pub fn from_snapshot(
        env: E,
        store: BlobStore,
        snapshot: &DeviceSnapshot,
    ) -> Result<Self, ClientError> {
        let identity_pair =
            IdentityKeyPair::from_secret_bytes(codec::decode_exact::<32>(&snapshot.identity_private)?);
        let signed_pre_key = PreKeyPair::from_secret_bytes(codec::decode_exact::<32>(
            &snapshot.signed_pre_key_private,
        )?);
        let spk_signature = codec::decode_exact::<64>(&snapshot.signed_pre_key_signature)?;

        let identity = ClientIdentity::new(
            snapshot.moltbot_id.clone(),
            IdentityKeys::from_parts(identity_pair, signed_pre_key, spk_signature, Vec::new()),
        );
        identity.save(&store)?;

        let mut client = Self::new(env, store, identity);

        for (conversation_id, chain) in &snapshot.sender_chains {
            let state = SenderState::from_parts(
                ChainKey::from_bytes(codec::decode_exact::<32>(&chain.chain_key)?),
                ChainKey::from_bytes(codec::decode_exact::<32>(&chain.initial_chain_key)?),
                chain.version,
                chain.message_index,
            );
            client.persist_sender(conversation_id, &state)?;
            client.sender.insert(conversation_id.clone(), state);
        }

        Ok(client)
    }

    fn unwrap_chain(&self, wrap_b64: &str) -> Result<ChainKey, ClientError> {
        let blob = codec::decode(wrap_b64)?;
        unwrap_sender_key(self.identity.signed_pre_key().secret(), &blob).map_err(|e| match e {
            SenderKeyError::MalformedWrap { .. } => ClientError::Wire { reason: e.to_string() },
            _ => ClientError::Undecryptable { reason: "sender key unwrap failed".to_string() },
        })
    }

    fn load_sender(&mut self, conversation_id: &str) -> Result<(), ClientError> {
        if self.sender.contains_key(conversation_id) {
            return Ok(());
        }
        if let Some(bytes) = self.store.get(&sender_store_key(conversation_id))? {
            let blob = serde_json::from_slice(&bytes)
                .map_err(|e| ClientError::Wire { reason: format!("sender chain blob: {e}") })?;
            self.sender.insert(conversation_id.to_string(), SenderState::from_blob(&blob)?);
        }
        Ok(())
    }

    fn persist_sender(&self, conversation_id: &str, state: &SenderState) -> Result<(), ClientError> {
        let bytes = serde_json::to_vec(&state.to_blob())
            .map_err(|e| ClientError::Wire { reason: e.to_string() })?;
        self.store.set(&sender_store_key(conversation_id), &bytes)?;
        Ok(())
    }

    fn load_received(&mut self, conversation_id: &str) -> Result<(), ClientError> {
        if self.received.contains_key(conversation_id) {
            return Ok(());
        }
        let mut senders = HashMap::new();
        if let Some(bytes) = self.store.get(&received_store_key(conversation_id))? {
            let blobs: BTreeMap<MoltbotId, crate::receiver_cache::ReceivedKeyBlob> =
                serde_json::from_slice(&bytes)
                    .map_err(|e| ClientError::Wire { reason: format!("received chain blob: {e}") })?;
            for (from_id, blob) in &blobs {
                senders.insert(from_id.clone(), ReceivedKey::from_blob(blob)?);
            }
        }
        self.received.insert(conversation_id.to_string(), senders);
        Ok(())
    }

    fn persist_received(&self, conversation_id: &str) -> Result<(), ClientError> {
        let Some(senders) = self.received.get(conversation_id) else {
            return Ok(());
        };
        let blobs: BTreeMap<&MoltbotId, crate::receiver_cache::ReceivedKeyBlob> =
            senders.iter().map(|(from_id, rk)| (from_id, rk.to_blob())).collect();
        let bytes = serde_json::to_vec(&blobs)
            .map_err(|e| ClientError::Wire { reason: e.to_string() })?;
        self.store.set(&received_store_key(conversation_id), &bytes)?;
        Ok(())
    }
}

fn sender_store_key(conversation_id: &str) -> String {
    format!("sender/{conversation_id}")
}

fn received_store_key(conversation_id: &str) -> String {
    format!("received/{conversation_id}")
}
