//! Sender chain state (the sending half of the ratchet).
//!
//! One [`SenderState`] per conversation the client sends in. The chain key
//! advances once per message; the *initial* chain key for the current
//! version is what gets wrapped to recipients, so late wraps still let them
//! start from index 0.
//!
//! # Invariants
//!
//! - `(chainKey, messageIndex)` is always `messageIndex` ratchet steps from
//!   `initialChainKey` within a version
//! - `messageIndex` strictly increases within a version; `version` strictly
//!   increases across rotations
//! - Message keys at spent indices are never recomputed

use moltdm_crypto::{ChainKey, Environment, MessageKey, message_key, next_chain_key};
use moltdm_proto::codec;
use serde::{Deserialize, Serialize};

use crate::error::ClientError;

/// Per-conversation sending state.
#[derive(Clone)]
pub struct SenderState {
    chain_key: ChainKey,
    initial_chain_key: ChainKey,
    version: u64,
    message_index: u32,
}

impl SenderState {
    /// Fresh chain at version 1, index 0.
    pub fn new(env: &impl Environment) -> Self {
        let key = ChainKey::from_bytes(env.random_array());
        Self { chain_key: key.clone(), initial_chain_key: key, version: 1, message_index: 0 }
    }

    /// Current chain version.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Next index a send will consume.
    pub fn message_index(&self) -> u32 {
        self.message_index
    }

    /// The chain key at index 0 of the current version (the distribution
    /// payload).
    pub fn initial_chain_key(&self) -> &ChainKey {
        &self.initial_chain_key
    }

    /// Derive the message key for the current index and advance the chain.
    ///
    /// Returns the key and the index it consumed. The caller MUST persist
    /// this state before the resulting ciphertext reaches the wire.
    pub fn next_message_key(&mut self) -> Result<(MessageKey, u32), ClientError> {
        if self.message_index == u32::MAX {
            return Err(ClientError::IndexExhausted);
        }

        let key = message_key(&self.chain_key);
        let used_index = self.message_index;

        self.chain_key = next_chain_key(&self.chain_key);
        self.message_index += 1;

        Ok((key, used_index))
    }

    /// Replace the chain for a new membership epoch.
    ///
    /// Bumps the version, resets the index, and draws a fresh random
    /// initial key. The next send distributes the new key to the new
    /// member set.
    pub fn rotate(&mut self, env: &impl Environment) {
        let key = ChainKey::from_bytes(env.random_array());
        self.chain_key = key.clone();
        self.initial_chain_key = key;
        self.version += 1;
        self.message_index = 0;
    }

    /// Serialize for the blob store.
    pub(crate) fn to_blob(&self) -> SenderStateBlob {
        SenderStateBlob {
            chain_key: codec::encode(self.chain_key.as_bytes()),
            initial_chain_key: codec::encode(self.initial_chain_key.as_bytes()),
            version: self.version,
            message_index: self.message_index,
        }
    }

    pub(crate) fn from_blob(blob: &SenderStateBlob) -> Result<Self, ClientError> {
        Ok(Self {
            chain_key: ChainKey::from_bytes(codec::decode_exact::<32>(&blob.chain_key)?),
            initial_chain_key: ChainKey::from_bytes(codec::decode_exact::<32>(
                &blob.initial_chain_key,
            )?),
            version: blob.version,
            message_index: blob.message_index,
        })
    }

    /// Rebuild from a pairing snapshot.
    pub(crate) fn from_parts(
        chain_key: ChainKey,
        initial_chain_key: ChainKey,
        version: u64,
        message_index: u32,
    ) -> Self {
        Self { chain_key, initial_chain_key, version, message_index }
    }

    pub(crate) fn chain_key(&self) -> &ChainKey {
        &self.chain_key
    }
}

/// Persisted form, all keys base64.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SenderStateBlob {
    pub chain_key: String,
    pub initial_chain_key: String,
    pub version: u64,
    pub message_index: u32,
}
