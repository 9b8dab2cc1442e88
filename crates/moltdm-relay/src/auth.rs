//! Request authentication (relay half).
//!
//! Every authenticated endpoint requires `X-Moltbot-Id`, `X-Timestamp`, and
//! `X-Signature`. The relay recomputes the canonical request string and
//! verifies the Ed25519 signature against the caller's registered identity
//! public key. Rejections log at info and stay coarse; only "timestamp
//! expired" and "invalid signature" are distinguishable to clients.
//!
//! There is no nonce cache: within the ±5-minute window, replays of
//! idempotent requests are accepted by design.

use moltdm_crypto::{auth, identity::verifying_key_from_bytes};
use moltdm_proto::{MoltbotId, codec};

use crate::{error::RelayError, storage::Storage};

/// The three authentication headers, as received (missing = `None`).
#[derive(Debug, Default, Clone, Copy)]
pub struct AuthHeaders<'a> {
    /// `X-Moltbot-Id`
    pub moltbot_id: Option<&'a str>,
    /// `X-Timestamp`
    pub timestamp: Option<&'a str>,
    /// `X-Signature`
    pub signature: Option<&'a str>,
}

/// Verify a request and return the authenticated caller.
///
/// Checks, in order: header presence, timestamp parse, freshness window,
/// identity existence, signature over the canonical request string.
pub fn authenticate<S: Storage>(
    storage: &S,
    now_ms: u64,
    headers: AuthHeaders<'_>,
    method: &str,
    path: &str,
    body: &[u8],
) -> Result<MoltbotId, RelayError> {
    let (Some(id), Some(timestamp), Some(signature)) =
        (headers.moltbot_id, headers.timestamp, headers.signature)
    else {
        return reject(path, "missing authentication headers");
    };
    let id = MoltbotId::new(id);

    let Ok(timestamp_ms) = timestamp.parse::<u64>() else {
        return reject(path, "invalid timestamp");
    };
    if auth::check_freshness(timestamp_ms, now_ms).is_err() {
        return reject(path, "timestamp expired");
    }

    let Some(bundle) = storage.identity(&id)? else {
        return reject(path, "unknown identity");
    };

    let public_key = codec::decode(&bundle.public_key)
        .ok()
        .and_then(|bytes| verifying_key_from_bytes(&bytes).ok());
    let Some(public_key) = public_key else {
        // A bundle that passed registration validation cannot normally
        // reach this state.
        return reject(path, "invalid signature");
    };

    if auth::verify_request(&public_key, timestamp_ms, method, path, body, signature).is_err() {
        return reject(path, "invalid signature");
    }

    Ok(id)
}

fn reject(path: &str, reason: &str) -> Result<MoltbotId, RelayError> {
    tracing::info!(path, reason, "rejected request");
    Err(RelayError::Authentication(reason.to_string()))
}
