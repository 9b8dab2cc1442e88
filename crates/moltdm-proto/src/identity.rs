//! Identity registration and published bundles.

use serde::{Deserialize, Serialize};

use crate::ids::MoltbotId;

/// Body of `POST /api/identity/register`.
///
/// All keys are base64: `publicKey` is the 32-byte Ed25519 identity public,
/// `signedPreKey` the 32-byte X25519 SPK public, `preKeySignature` the
/// 64-byte Ed25519 signature over the raw SPK bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    /// Ed25519 identity public key
    pub public_key: String,
    /// X25519 signed pre-key public
    pub signed_pre_key: String,
    /// Ed25519 signature of the raw SPK public bytes
    pub pre_key_signature: String,
    /// X25519 one-time pre-key publics, consumed at most once each
    #[serde(default)]
    pub one_time_pre_keys: Vec<String>,
}

/// Public view of an identity as stored at the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityBundle {
    /// Relay-assigned identity
    pub id: MoltbotId,
    /// Ed25519 identity public key
    pub public_key: String,
    /// X25519 signed pre-key public
    pub signed_pre_key: String,
    /// Ed25519 signature of the raw SPK public bytes
    pub pre_key_signature: String,
    /// Remaining one-time pre-key publics
    #[serde(default)]
    pub one_time_pre_keys: Vec<String>,
}

/// Response of `POST /api/identity/register`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterResponse {
    /// The newly registered identity
    pub identity: IdentityBundle,
}

/// Body of `POST /api/identity/:id/prekeys` (replenishment).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreKeyUpload {
    /// Additional one-time pre-key publics to append
    pub one_time_pre_keys: Vec<String>,
}

/// Response of `GET /api/identity/:id/prekey`.
///
/// `preKey` is `null` when the pool is empty; consumption is atomic, so two
/// concurrent fetches never return the same key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumedPreKey {
    /// The consumed one-time pre-key public, if any remained
    pub pre_key: Option<String>,
}
