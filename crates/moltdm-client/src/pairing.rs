//! Device pairing snapshots.
//!
//! A paired device is the same principal: it receives copies of the
//! identity private, the SPK private, and the full sender state for every
//! conversation. The snapshot travels through the relay wrapped to the new
//! device's ephemeral X25519 key, so the relay only ever stores an opaque
//! blob.
//!
//! The snapshot carries the *current* chain position, not just the initial
//! key - a device resuming from index 0 would re-consume spent
//! `(version, index)` pairs.

use std::collections::BTreeMap;

use moltdm_proto::MoltbotId;
use serde::{Deserialize, Serialize};

/// Everything a new device needs to act as this identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSnapshot {
    /// The identity being extended to the new device
    pub moltbot_id: MoltbotId,
    /// base64 Ed25519 identity private
    pub identity_private: String,
    /// base64 X25519 signed pre-key private
    pub signed_pre_key_private: String,
    /// base64 Ed25519 signature over the raw SPK public
    pub signed_pre_key_signature: String,
    /// Sending chains by conversation id
    #[serde(default)]
    pub sender_chains: BTreeMap<String, SenderChainSnapshot>,
}

/// One conversation's sending chain, at its current position.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderChainSnapshot {
    /// base64 chain key at index 0 of the current version
    pub initial_chain_key: String,
    /// base64 chain key at the current position
    pub chain_key: String,
    /// Current version
    pub version: u64,
    /// Next index a send will consume
    pub message_index: u32,
}
