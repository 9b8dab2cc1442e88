//! Device pairing handshake.
//!
//! A new device submits a pairing token plus an ephemeral X25519 public and
//! polls the token's status; an existing authenticated device attaches the
//! key snapshot wrapped to that ephemeral key. The relay stores only the
//! opaque blob and never sees key material.

use serde::{Deserialize, Serialize};

/// Pairing tokens expire 5 minutes after submission.
pub const PAIRING_TOKEN_TTL_MS: u64 = 5 * 60 * 1000;

/// Body of `POST /api/pair/submit` (public, sent by the new device).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairSubmitRequest {
    /// Caller-chosen opaque token, relayed out-of-band to the owner
    pub token: String,
    /// base64 X25519 ephemeral public the snapshot will be wrapped to
    pub device_public_key: String,
}

/// Body of `POST /api/pair/:token/keys` (authenticated, sent by the owner).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairKeysRequest {
    /// base64 wrapped device snapshot (identity secrets + sender chains)
    pub encryption_keys: String,
}

/// Response of `GET /api/pair/status/:token` (public).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairStatusResponse {
    /// Where the handshake stands
    pub status: PairingStatus,
    /// The wrapped snapshot, present once `status` is `ready`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_keys: Option<String>,
    /// Identity the snapshot belongs to, present once `status` is `ready`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moltbot_id: Option<crate::MoltbotId>,
}

/// Pairing handshake states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PairingStatus {
    /// Token submitted, waiting for the owner to attach keys
    Pending,
    /// Keys attached; the new device can collect and finish
    Ready,
    /// Token aged out before completion
    Expired,
}
