//! Redb-backed durable storage implementation.
//!
//! Uses Redb's ACID transactions with Copy-on-Write for crash safety. All
//! state survives relay restarts. Values are the JSON wire forms; message
//! and event keys are composite `conversation ‖ 0x00 ‖ big-endian ordinal`
//! so a range scan yields delivery order directly.

use std::{ops::Bound, path::Path, sync::Arc};

use moltdm_proto::{Conversation, IdentityBundle, MembershipEvent, MessageRecord, MoltbotId};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Serialize, de::DeserializeOwned};

use super::{PairingRecord, ReadCursor, ReadPosition, Storage, StorageError};

/// Table: identities. Key: moltbot id. Value: JSON `IdentityBundle`.
const IDENTITIES: TableDefinition<&str, &[u8]> = TableDefinition::new("identities");

/// Table: conversations. Key: conversation id. Value: JSON `Conversation`.
const CONVERSATIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("conversations");

/// Table: messages.
/// Key: `conversation ‖ 0x00 ‖ created_at (8 bytes BE) ‖ message id`.
/// Value: JSON `MessageRecord`.
const MESSAGES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("messages");

/// Table: membership events.
/// Key: `conversation ‖ 0x00 ‖ seq (8 bytes BE)`. Value: JSON event.
const EVENTS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("events");

/// Table: read cursors. Key: `member|conversation`. Value: JSON cursor.
const CURSORS: TableDefinition<&str, &[u8]> = TableDefinition::new("cursors");

/// Table: pairing requests. Key: token. Value: JSON `PairingRecord`.
const PAIRINGS: TableDefinition<&str, &[u8]> = TableDefinition::new("pairings");

/// Durable storage backed by Redb.
///
/// Thread-safe through Redb's internal locking. Clone is cheap (`Arc`).
#[derive(Clone)]
pub struct RedbStorage {
    db: Arc<Database>,
}

impl RedbStorage {
    /// Open or create a Redb database at the given path.
    ///
    /// Creates all tables if they don't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = Database::create(path.as_ref()).map_err(io)?;

        let txn = db.begin_write().map_err(io)?;
        {
            let _ = txn.open_table(IDENTITIES).map_err(io)?;
            let _ = txn.open_table(CONVERSATIONS).map_err(io)?;
            let _ = txn.open_table(MESSAGES).map_err(io)?;
            let _ = txn.open_table(EVENTS).map_err(io)?;
            let _ = txn.open_table(CURSORS).map_err(io)?;
            let _ = txn.open_table(PAIRINGS).map_err(io)?;
        }
        txn.commit().map_err(io)?;

        Ok(Self { db: Arc::new(db) })
    }
}

fn io(e: impl std::fmt::Display) -> StorageError {
    StorageError::Io(e.to_string())
}

fn to_json<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    serde_json::to_vec(value).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn from_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    serde_json::from_slice(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn message_key(conversation_id: &str, created_at: u64, id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(conversation_id.len() + 1 + 8 + id.len());
    key.extend_from_slice(conversation_id.as_bytes());
    key.push(0x00);
    key.extend_from_slice(&created_at.to_be_bytes());
    key.extend_from_slice(id.as_bytes());
    key
}

fn event_key(conversation_id: &str, seq: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(conversation_id.len() + 1 + 8);
    key.extend_from_slice(conversation_id.as_bytes());
    key.push(0x00);
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

/// Exclusive upper bound covering every key for one conversation.
fn conversation_end_key(conversation_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(conversation_id.len() + 1);
    key.extend_from_slice(conversation_id.as_bytes());
    key.push(0x01);
    key
}

fn conversation_start_key(conversation_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(conversation_id.len() + 1);
    key.extend_from_slice(conversation_id.as_bytes());
    key.push(0x00);
    key
}

fn cursor_key(member: &MoltbotId, conversation_id: &str) -> String {
    format!("{member}|{conversation_id}")
}

impl Storage for RedbStorage {
    fn put_identity(&self, bundle: &IdentityBundle) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(io)?;
        {
            let mut table = txn.open_table(IDENTITIES).map_err(io)?;
            table.insert(bundle.id.as_str(), to_json(bundle)?.as_slice()).map_err(io)?;
        }
        txn.commit().map_err(io)
    }

    fn identity(&self, id: &MoltbotId) -> Result<Option<IdentityBundle>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(IDENTITIES).map_err(io)?;
        table.get(id.as_str()).map_err(io)?.map(|guard| from_json(guard.value())).transpose()
    }

    fn append_prekeys(
        &self,
        id: &MoltbotId,
        prekeys: &[String],
    ) -> Result<Option<IdentityBundle>, StorageError> {
        let txn = self.db.begin_write().map_err(io)?;
        let updated = {
            let mut table = txn.open_table(IDENTITIES).map_err(io)?;
            let Some(mut bundle) = table
                .get(id.as_str())
                .map_err(io)?
                .map(|guard| from_json::<IdentityBundle>(guard.value()))
                .transpose()?
            else {
                return Ok(None);
            };
            bundle.one_time_pre_keys.extend(prekeys.iter().cloned());
            table.insert(id.as_str(), to_json(&bundle)?.as_slice()).map_err(io)?;
            bundle
        };
        txn.commit().map_err(io)?;
        Ok(Some(updated))
    }

    fn consume_prekey(&self, id: &MoltbotId) -> Result<Option<String>, StorageError> {
        let txn = self.db.begin_write().map_err(io)?;
        let consumed = {
            let mut table = txn.open_table(IDENTITIES).map_err(io)?;
            let Some(mut bundle) = table
                .get(id.as_str())
                .map_err(io)?
                .map(|guard| from_json::<IdentityBundle>(guard.value()))
                .transpose()?
            else {
                return Ok(None);
            };
            if bundle.one_time_pre_keys.is_empty() {
                return Ok(None);
            }
            let prekey = bundle.one_time_pre_keys.remove(0);
            table.insert(id.as_str(), to_json(&bundle)?.as_slice()).map_err(io)?;
            prekey
        };
        txn.commit().map_err(io)?;
        Ok(Some(consumed))
    }

    fn put_conversation(&self, conversation: &Conversation) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(io)?;
        {
            let mut table = txn.open_table(CONVERSATIONS).map_err(io)?;
            table
                .insert(conversation.id.as_str(), to_json(conversation)?.as_slice())
                .map_err(io)?;
        }
        txn.commit().map_err(io)
    }

    fn conversation(&self, id: &str) -> Result<Option<Conversation>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(CONVERSATIONS).map_err(io)?;
        table.get(id).map_err(io)?.map(|guard| from_json(guard.value())).transpose()
    }

    fn conversations_for(&self, member: &MoltbotId) -> Result<Vec<Conversation>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(CONVERSATIONS).map_err(io)?;

        let mut conversations = Vec::new();
        for entry in table.iter().map_err(io)? {
            let (_, value) = entry.map_err(io)?;
            let conversation: Conversation = from_json(value.value())?;
            if conversation.is_member(member) {
                conversations.push(conversation);
            }
        }
        Ok(conversations)
    }

    fn delete_conversation(&self, id: &str) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(io)?;
        {
            let mut conversations = txn.open_table(CONVERSATIONS).map_err(io)?;
            conversations.remove(id).map_err(io)?;

            let start = conversation_start_key(id);
            let end = conversation_end_key(id);

            for table_def in [MESSAGES, EVENTS] {
                let mut table = txn.open_table(table_def).map_err(io)?;
                let doomed: Vec<Vec<u8>> = table
                    .range::<&[u8]>((Bound::Included(start.as_slice()), Bound::Excluded(end.as_slice())))
                    .map_err(io)?
                    .map(|entry| entry.map(|(k, _)| k.value().to_vec()).map_err(io))
                    .collect::<Result<_, _>>()?;
                for key in doomed {
                    table.remove(key.as_slice()).map_err(io)?;
                }
            }

            let mut cursors = txn.open_table(CURSORS).map_err(io)?;
            let suffix = format!("|{id}");
            let doomed: Vec<String> = cursors
                .iter()
                .map_err(io)?
                .filter_map(|entry| match entry {
                    Ok((k, _)) if k.value().ends_with(&suffix) => Some(Ok(k.value().to_string())),
                    Ok(_) => None,
                    Err(e) => Some(Err(io(e))),
                })
                .collect::<Result<_, _>>()?;
            for key in doomed {
                cursors.remove(key.as_str()).map_err(io)?;
            }
        }
        txn.commit().map_err(io)
    }

    fn append_message(&self, record: &MessageRecord) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(io)?;
        {
            let mut table = txn.open_table(MESSAGES).map_err(io)?;
            let key = message_key(&record.conversation_id, record.created_at, &record.id);
            table.insert(key.as_slice(), to_json(record)?.as_slice()).map_err(io)?;
        }
        txn.commit().map_err(io)
    }

    fn messages_after(
        &self,
        conversation_id: &str,
        after: Option<&ReadPosition>,
        limit: usize,
        now_ms: u64,
    ) -> Result<Vec<MessageRecord>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(MESSAGES).map_err(io)?;

        let start_key;
        let start = match after {
            Some(pos) => {
                start_key = message_key(conversation_id, pos.created_at, &pos.id);
                Bound::Excluded(start_key.as_slice())
            },
            None => {
                start_key = conversation_start_key(conversation_id);
                Bound::Included(start_key.as_slice())
            },
        };
        let end_key = conversation_end_key(conversation_id);
        let end = Bound::Excluded(end_key.as_slice());

        let mut records = Vec::with_capacity(limit.min(64));
        for entry in table.range::<&[u8]>((start, end)).map_err(io)? {
            if records.len() == limit {
                break;
            }
            let (_, value) = entry.map_err(io)?;
            let record: MessageRecord = from_json(value.value())?;
            if !record.is_expired(now_ms) {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn purge_expired(&self, now_ms: u64) -> Result<usize, StorageError> {
        let txn = self.db.begin_write().map_err(io)?;
        let removed = {
            let mut table = txn.open_table(MESSAGES).map_err(io)?;
            let doomed: Vec<Vec<u8>> = table
                .iter()
                .map_err(io)?
                .filter_map(|entry| match entry {
                    Ok((key, value)) => match from_json::<MessageRecord>(value.value()) {
                        Ok(record) if record.is_expired(now_ms) => {
                            Some(Ok(key.value().to_vec()))
                        },
                        Ok(_) => None,
                        Err(e) => Some(Err(e)),
                    },
                    Err(e) => Some(Err(io(e))),
                })
                .collect::<Result<_, _>>()?;
            for key in &doomed {
                table.remove(key.as_slice()).map_err(io)?;
            }
            doomed.len()
        };
        txn.commit().map_err(io)?;
        Ok(removed)
    }

    fn append_event(&self, mut event: MembershipEvent) -> Result<MembershipEvent, StorageError> {
        let txn = self.db.begin_write().map_err(io)?;
        {
            let mut table = txn.open_table(EVENTS).map_err(io)?;

            let start = conversation_start_key(&event.conversation_id);
            let end = conversation_end_key(&event.conversation_id);
            let last_seq = table
                .range::<&[u8]>((Bound::Included(start.as_slice()), Bound::Excluded(end.as_slice())))
                .map_err(io)?
                .last()
                .transpose()
                .map_err(io)?
                .map(|(_, value)| from_json::<MembershipEvent>(value.value()))
                .transpose()?
                .map_or(0, |e| e.seq);
            event.seq = last_seq + 1;

            let key = event_key(&event.conversation_id, event.seq);
            table.insert(key.as_slice(), to_json(&event)?.as_slice()).map_err(io)?;
        }
        txn.commit().map_err(io)?;
        Ok(event)
    }

    fn events_after(
        &self,
        conversation_id: &str,
        after_seq: u64,
    ) -> Result<Vec<MembershipEvent>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(EVENTS).map_err(io)?;

        let start = event_key(conversation_id, after_seq);
        let end = conversation_end_key(conversation_id);

        let mut events = Vec::new();
        for entry in table
            .range::<&[u8]>((Bound::Excluded(start.as_slice()), Bound::Excluded(end.as_slice())))
            .map_err(io)?
        {
            let (_, value) = entry.map_err(io)?;
            events.push(from_json(value.value())?);
        }
        Ok(events)
    }

    fn read_cursor(
        &self,
        member: &MoltbotId,
        conversation_id: &str,
    ) -> Result<ReadCursor, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(CURSORS).map_err(io)?;
        Ok(table
            .get(cursor_key(member, conversation_id).as_str())
            .map_err(io)?
            .map(|guard| from_json(guard.value()))
            .transpose()?
            .unwrap_or_default())
    }

    fn put_read_cursor(
        &self,
        member: &MoltbotId,
        conversation_id: &str,
        cursor: &ReadCursor,
    ) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(io)?;
        {
            let mut table = txn.open_table(CURSORS).map_err(io)?;
            table
                .insert(cursor_key(member, conversation_id).as_str(), to_json(cursor)?.as_slice())
                .map_err(io)?;
        }
        txn.commit().map_err(io)
    }

    fn put_pairing(&self, record: &PairingRecord) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(io)?;
        {
            let mut table = txn.open_table(PAIRINGS).map_err(io)?;
            table.insert(record.token.as_str(), to_json(record)?.as_slice()).map_err(io)?;
        }
        txn.commit().map_err(io)
    }

    fn pairing(&self, token: &str) -> Result<Option<PairingRecord>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(PAIRINGS).map_err(io)?;
        table.get(token).map_err(io)?.map(|guard| from_json(guard.value())).transpose()
    }
}
