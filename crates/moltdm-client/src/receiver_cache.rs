//! Receiver chain state (the receiving half of the ratchet).
//!
//! One [`ReceivedKey`] per (conversation, sender), created on the first
//! successfully unwrapped sender key and replaced wholesale when a strictly
//! newer version arrives. `messageIndex` is the index of the *next*
//! message expected from that sender at the current version.
//!
//! Keys for indices the chain ratchets past are held in a bounded in-memory
//! cache so a delayed earlier message can still be decrypted; the cache
//! does not survive a restart.

use std::collections::VecDeque;

use moltdm_crypto::{ChainKey, MessageKey, message_key, next_chain_key};
use moltdm_proto::codec;
use serde::{Deserialize, Serialize};

use crate::error::ClientError;

/// Refuse to ratchet more than this many indices forward in one step.
pub const MAX_SKIP: u32 = 1000;

/// Skipped message keys retained per (conversation, sender).
pub const MAX_CACHED_SKIPPED: usize = 256;

/// Receiving state for one sender in one conversation.
#[derive(Clone)]
pub struct ReceivedKey {
    chain_key: ChainKey,
    version: u64,
    message_index: u32,
    skipped: VecDeque<SkippedKey>,
}

#[derive(Clone)]
struct SkippedKey {
    version: u64,
    index: u32,
    key: MessageKey,
}

impl ReceivedKey {
    /// Install a freshly unwrapped chain at index 0.
    pub fn install(chain_key: ChainKey, version: u64) -> Self {
        Self { chain_key, version, message_index: 0, skipped: VecDeque::new() }
    }

    /// Version of the chain currently held.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Index of the next expected message.
    pub fn message_index(&self) -> u32 {
        self.message_index
    }

    /// Replace the chain with a strictly newer version.
    ///
    /// Skipped keys from older versions are retained so late stragglers
    /// from before a rotation stay decryptable.
    pub fn replace_chain(&mut self, chain_key: ChainKey, version: u64) {
        debug_assert!(version > self.version);
        self.chain_key = chain_key;
        self.version = version;
        self.message_index = 0;
    }

    /// Message key for a message at `(version, target)`.
    ///
    /// For the current position this is one ratchet step; ahead of the
    /// position the chain ratchets forward, caching the keys it skips;
    /// behind the position only the skipped-key cache can answer.
    ///
    /// # Errors
    ///
    /// - `PastIndex`: behind the chain and not in the cache
    /// - `SkipTooLarge`: more than [`MAX_SKIP`] ahead
    /// - `Undecryptable`: message is for a version this chain no longer
    ///   holds and no cached key remains
    pub fn message_key_for(&mut self, version: u64, target: u32) -> Result<MessageKey, ClientError> {
        if version != self.version {
            // Only the skipped cache can serve other (older) versions.
            return self.take_skipped(version, target).ok_or_else(|| {
                ClientError::Undecryptable {
                    reason: format!(
                        "message at sender key version {version}, chain holds {}",
                        self.version
                    ),
                }
            });
        }

        if target < self.message_index {
            return self
                .take_skipped(version, target)
                .ok_or(ClientError::PastIndex { current: self.message_index, requested: target });
        }

        let skip = target - self.message_index;
        if skip > MAX_SKIP {
            return Err(ClientError::SkipTooLarge {
                current: self.message_index,
                requested: target,
            });
        }

        while self.message_index < target {
            let key = message_key(&self.chain_key);
            self.cache_skipped(self.version, self.message_index, key);
            self.chain_key = next_chain_key(&self.chain_key);
            self.message_index += 1;
        }

        let key = message_key(&self.chain_key);
        self.chain_key = next_chain_key(&self.chain_key);
        self.message_index += 1;

        Ok(key)
    }

    fn cache_skipped(&mut self, version: u64, index: u32, key: MessageKey) {
        if self.skipped.len() == MAX_CACHED_SKIPPED {
            self.skipped.pop_front();
        }
        self.skipped.push_back(SkippedKey { version, index, key });
    }

    fn take_skipped(&mut self, version: u64, index: u32) -> Option<MessageKey> {
        let pos = self.skipped.iter().position(|s| s.version == version && s.index == index)?;
        self.skipped.remove(pos).map(|s| s.key)
    }

    /// Serialize for the blob store. The skipped cache is in-memory only.
    pub(crate) fn to_blob(&self) -> ReceivedKeyBlob {
        ReceivedKeyBlob {
            chain_key: codec::encode(self.chain_key.as_bytes()),
            version: self.version,
            message_index: self.message_index,
        }
    }

    pub(crate) fn from_blob(blob: &ReceivedKeyBlob) -> Result<Self, ClientError> {
        Ok(Self {
            chain_key: ChainKey::from_bytes(codec::decode_exact::<32>(&blob.chain_key)?),
            version: blob.version,
            message_index: blob.message_index,
            skipped: VecDeque::new(),
        })
    }
}

/// Persisted form, keyed by `received/<conversationId>:<fromId>`.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ReceivedKeyBlob {
    pub chain_key: String,
    pub version: u64,
    pub message_index: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(byte: u8) -> ChainKey {
        ChainKey::from_bytes([byte; 32])
    }

    /// Sender-side key at a given index, for comparison.
    fn sender_key_at(initial: &ChainKey, index: u32) -> MessageKey {
        let mut ck = initial.clone();
        for _ in 0..index {
            ck = next_chain_key(&ck);
        }
        message_key(&ck)
    }

    #[test]
    fn in_order_delivery_matches_sender() {
        let initial = chain(0x42);
        let mut rk = ReceivedKey::install(initial.clone(), 1);

        for index in 0..5 {
            let key = rk.message_key_for(1, index).unwrap();
            assert_eq!(key.as_bytes(), sender_key_at(&initial, index).as_bytes());
            assert_eq!(rk.message_index(), index + 1);
        }
    }

    #[test]
    fn skip_forward_caches_intermediate_keys() {
        let initial = chain(0x42);
        let mut rk = ReceivedKey::install(initial.clone(), 1);

        // Jump straight to index 3; indices 0..2 land in the cache.
        let key3 = rk.message_key_for(1, 3).unwrap();
        assert_eq!(key3.as_bytes(), sender_key_at(&initial, 3).as_bytes());
        assert_eq!(rk.message_index(), 4);

        // The delayed earlier messages still decrypt, in any order.
        let key1 = rk.message_key_for(1, 1).unwrap();
        assert_eq!(key1.as_bytes(), sender_key_at(&initial, 1).as_bytes());

        let key0 = rk.message_key_for(1, 0).unwrap();
        assert_eq!(key0.as_bytes(), sender_key_at(&initial, 0).as_bytes());

        // Each cached key is single-use.
        assert!(matches!(
            rk.message_key_for(1, 0),
            Err(ClientError::PastIndex { current: 4, requested: 0 })
        ));
    }

    #[test]
    fn past_index_without_cache_fails() {
        let mut rk = ReceivedKey::install(chain(0x42), 1);

        rk.message_key_for(1, 0).unwrap();
        rk.message_key_for(1, 1).unwrap();

        // Index 0 was consumed normally, never skipped, so it is gone.
        assert!(matches!(
            rk.message_key_for(1, 0),
            Err(ClientError::PastIndex { current: 2, requested: 0 })
        ));
    }

    #[test]
    fn skip_beyond_limit_fails() {
        let mut rk = ReceivedKey::install(chain(0x42), 1);

        let result = rk.message_key_for(1, MAX_SKIP + 1);
        assert!(matches!(result, Err(ClientError::SkipTooLarge { .. })));

        // State untouched by the refusal.
        assert_eq!(rk.message_index(), 0);
    }

    #[test]
    fn replace_chain_keeps_old_version_skipped_keys() {
        let v1_initial = chain(0x42);
        let mut rk = ReceivedKey::install(v1_initial.clone(), 1);

        // Skip past index 0 at version 1, then rotate to version 2.
        rk.message_key_for(1, 1).unwrap();
        rk.replace_chain(chain(0x43), 2);
        assert_eq!(rk.version(), 2);
        assert_eq!(rk.message_index(), 0);

        // The straggler from version 1 still decrypts from the cache.
        let key = rk.message_key_for(1, 0).unwrap();
        assert_eq!(key.as_bytes(), sender_key_at(&v1_initial, 0).as_bytes());

        // But a version-1 message that was never skipped does not.
        assert!(matches!(
            rk.message_key_for(1, 5),
            Err(ClientError::Undecryptable { .. })
        ));
    }

    #[test]
    fn cache_is_bounded() {
        let mut rk = ReceivedKey::install(chain(0x42), 1);

        // Skip far enough to overflow the cache: indices 0..500 cached,
        // oldest evicted beyond MAX_CACHED_SKIPPED.
        rk.message_key_for(1, 500).unwrap();

        assert!(rk.skipped.len() <= MAX_CACHED_SKIPPED);

        // Oldest were evicted, newest survive.
        assert!(rk.message_key_for(1, 0).is_err());
        assert!(rk.message_key_for(1, 499).is_ok());
    }

    #[test]
    fn blob_roundtrip_drops_skipped_cache() {
        let mut rk = ReceivedKey::install(chain(0x42), 3);
        rk.message_key_for(3, 2).unwrap();

        let restored = ReceivedKey::from_blob(&rk.to_blob()).unwrap();

        assert_eq!(restored.version(), 3);
        assert_eq!(restored.message_index(), 3);
        assert!(restored.skipped.is_empty());
    }
}
