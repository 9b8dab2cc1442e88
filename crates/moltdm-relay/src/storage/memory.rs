use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use moltdm_proto::{Conversation, IdentityBundle, MembershipEvent, MessageRecord, MoltbotId};

use super::{PairingRecord, ReadCursor, ReadPosition, Storage, StorageError, is_after};

/// In-memory storage implementation for testing and small deployments.
///
/// All state is wrapped in `Arc<Mutex<_>>` so clones share the same
/// underlying storage. Operations are O(1) except message and event reads,
/// which sort or scan one conversation's records. State is lost on restart.
#[derive(Clone)]
pub struct MemoryStorage {
    inner: Arc<Mutex<MemoryStorageInner>>,
}

#[derive(Default)]
struct MemoryStorageInner {
    identities: HashMap<MoltbotId, IdentityBundle>,
    conversations: HashMap<String, Conversation>,
    /// Messages per conversation, in arrival order
    messages: HashMap<String, Vec<MessageRecord>>,
    /// Membership events per conversation, `seq` assigned on append
    events: HashMap<String, Vec<MembershipEvent>>,
    /// Read cursors keyed by `member|conversation`
    cursors: HashMap<String, ReadCursor>,
    pairings: HashMap<String, PairingRecord>,
}

impl MemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(MemoryStorageInner::default())) }
    }

    #[allow(clippy::expect_used)]
    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryStorageInner> {
        self.inner.lock().expect("memory storage mutex poisoned")
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

fn cursor_key(member: &MoltbotId, conversation_id: &str) -> String {
    format!("{member}|{conversation_id}")
}

impl Storage for MemoryStorage {
    fn put_identity(&self, bundle: &IdentityBundle) -> Result<(), StorageError> {
        self.lock().identities.insert(bundle.id.clone(), bundle.clone());
        Ok(())
    }

    fn identity(&self, id: &MoltbotId) -> Result<Option<IdentityBundle>, StorageError> {
        Ok(self.lock().identities.get(id).cloned())
    }

    fn append_prekeys(
        &self,
        id: &MoltbotId,
        prekeys: &[String],
    ) -> Result<Option<IdentityBundle>, StorageError> {
        let mut inner = self.lock();
        let Some(bundle) = inner.identities.get_mut(id) else {
            return Ok(None);
        };
        bundle.one_time_pre_keys.extend(prekeys.iter().cloned());
        Ok(Some(bundle.clone()))
    }

    fn consume_prekey(&self, id: &MoltbotId) -> Result<Option<String>, StorageError> {
        let mut inner = self.lock();
        let Some(bundle) = inner.identities.get_mut(id) else {
            return Ok(None);
        };
        if bundle.one_time_pre_keys.is_empty() {
            return Ok(None);
        }
        Ok(Some(bundle.one_time_pre_keys.remove(0)))
    }

    fn put_conversation(&self, conversation: &Conversation) -> Result<(), StorageError> {
        self.lock().conversations.insert(conversation.id.clone(), conversation.clone());
        Ok(())
    }

    fn conversation(&self, id: &str) -> Result<Option<Conversation>, StorageError> {
        Ok(self.lock().conversations.get(id).cloned())
    }

    fn conversations_for(&self, member: &MoltbotId) -> Result<Vec<Conversation>, StorageError> {
        Ok(self
            .lock()
            .conversations
            .values()
            .filter(|c| c.is_member(member))
            .cloned()
            .collect())
    }

    fn delete_conversation(&self, id: &str) -> Result<(), StorageError> {
        let mut inner = self.lock();
        inner.conversations.remove(id);
        inner.messages.remove(id);
        inner.events.remove(id);
        inner.cursors.retain(|key, _| !key.ends_with(&format!("|{id}")));
        Ok(())
    }

    fn append_message(&self, record: &MessageRecord) -> Result<(), StorageError> {
        self.lock()
            .messages
            .entry(record.conversation_id.clone())
            .or_default()
            .push(record.clone());
        Ok(())
    }

    fn messages_after(
        &self,
        conversation_id: &str,
        after: Option<&ReadPosition>,
        limit: usize,
        now_ms: u64,
    ) -> Result<Vec<MessageRecord>, StorageError> {
        let inner = self.lock();
        let Some(records) = inner.messages.get(conversation_id) else {
            return Ok(Vec::new());
        };

        let mut selected: Vec<MessageRecord> = records
            .iter()
            .filter(|r| !r.is_expired(now_ms))
            .filter(|r| after.is_none_or(|pos| is_after(r, pos)))
            .cloned()
            .collect();
        selected.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        selected.truncate(limit);

        Ok(selected)
    }

    fn purge_expired(&self, now_ms: u64) -> Result<usize, StorageError> {
        let mut inner = self.lock();
        let mut removed = 0;
        for records in inner.messages.values_mut() {
            let before = records.len();
            records.retain(|r| !r.is_expired(now_ms));
            removed += before - records.len();
        }
        Ok(removed)
    }

    fn append_event(&self, mut event: MembershipEvent) -> Result<MembershipEvent, StorageError> {
        let mut inner = self.lock();
        let log = inner.events.entry(event.conversation_id.clone()).or_default();
        event.seq = log.last().map_or(1, |last| last.seq + 1);
        log.push(event.clone());
        Ok(event)
    }

    fn events_after(
        &self,
        conversation_id: &str,
        after_seq: u64,
    ) -> Result<Vec<MembershipEvent>, StorageError> {
        let inner = self.lock();
        Ok(inner
            .events
            .get(conversation_id)
            .map(|log| log.iter().filter(|e| e.seq > after_seq).cloned().collect())
            .unwrap_or_default())
    }

    fn read_cursor(
        &self,
        member: &MoltbotId,
        conversation_id: &str,
    ) -> Result<ReadCursor, StorageError> {
        Ok(self
            .lock()
            .cursors
            .get(&cursor_key(member, conversation_id))
            .cloned()
            .unwrap_or_default())
    }

    fn put_read_cursor(
        &self,
        member: &MoltbotId,
        conversation_id: &str,
        cursor: &ReadCursor,
    ) -> Result<(), StorageError> {
        self.lock().cursors.insert(cursor_key(member, conversation_id), cursor.clone());
        Ok(())
    }

    fn put_pairing(&self, record: &PairingRecord) -> Result<(), StorageError> {
        self.lock().pairings.insert(record.token.clone(), record.clone());
        Ok(())
    }

    fn pairing(&self, token: &str) -> Result<Option<PairingRecord>, StorageError> {
        Ok(self.lock().pairings.get(token).cloned())
    }
}
