//! Identity store (load-or-create, persistence, registration material).
//!
//! One JSON blob per identity under the `identity` key, all key bytes
//! base64:
//!
//! ```json
//! {
//!   "moltbotId": "moltbot_…",
//!   "publicKey": "…", "privateKey": "…",
//!   "signedPreKey": { "public": "…", "private": "…", "signature": "…" },
//!   "oneTimePreKeys": [ { "public": "…", "private": "…" } ]
//! }
//! ```
//!
//! An identity whose `signedPreKey.private` is absent can be parsed but can
//! never decrypt a sender-key wrap; it is rejected at load time.

use moltdm_crypto::{
    Environment, IdentityKeyPair, PreKeyPair,
    identity::{self, DEFAULT_ONE_TIME_PREKEY_COUNT},
};
use moltdm_proto::{MoltbotId, PreKeyUpload, RegisterRequest, codec};
use serde::{Deserialize, Serialize};

use crate::{error::ClientError, storage::BlobStore};

/// Blob-store key for the identity record.
const IDENTITY_KEY: &str = "identity";

/// Key material generated at registration time, before the relay has
/// assigned an id.
pub struct IdentityKeys {
    identity: IdentityKeyPair,
    signed_pre_key: PreKeyPair,
    spk_signature: [u8; 64],
    one_time_pre_keys: Vec<PreKeyPair>,
}

impl IdentityKeys {
    /// Generate a complete fresh key set: identity pair, signed pre-key
    /// (attested by the identity key over the raw SPK public), and the
    /// default pool of one-time pre-keys.
    pub fn generate(env: &impl Environment) -> Self {
        let identity_pair = IdentityKeyPair::generate(env);
        let signed_pre_key = PreKeyPair::generate(env);
        let spk_signature =
            identity::sign_prekey(&identity_pair, &signed_pre_key.public()).to_bytes();
        let one_time_pre_keys =
            identity::generate_one_time_prekeys(env, DEFAULT_ONE_TIME_PREKEY_COUNT);

        Self { identity: identity_pair, signed_pre_key, spk_signature, one_time_pre_keys }
    }

    /// Rebuild key material from persisted or snapshot parts.
    pub(crate) fn from_parts(
        identity: IdentityKeyPair,
        signed_pre_key: PreKeyPair,
        spk_signature: [u8; 64],
        one_time_pre_keys: Vec<PreKeyPair>,
    ) -> Self {
        Self { identity, signed_pre_key, spk_signature, one_time_pre_keys }
    }

    /// The registration body publishing the public halves.
    pub fn register_request(&self) -> RegisterRequest {
        RegisterRequest {
            public_key: codec::encode(self.identity.verifying_key().as_bytes()),
            signed_pre_key: codec::encode(self.signed_pre_key.public().as_bytes()),
            pre_key_signature: codec::encode(self.spk_signature),
            one_time_pre_keys: self
                .one_time_pre_keys
                .iter()
                .map(|k| codec::encode(k.public().as_bytes()))
                .collect(),
        }
    }
}

/// A registered client identity: key material plus the relay-assigned id.
pub struct ClientIdentity {
    /// Relay-assigned routing address.
    pub moltbot_id: MoltbotId,
    keys: IdentityKeys,
}

impl ClientIdentity {
    /// Bind freshly generated keys to the id the relay assigned.
    pub fn new(moltbot_id: MoltbotId, keys: IdentityKeys) -> Self {
        Self { moltbot_id, keys }
    }

    /// The Ed25519 identity pair (request signing).
    pub fn identity_keys(&self) -> &IdentityKeyPair {
        &self.keys.identity
    }

    /// The X25519 signed pre-key pair (wrap decryption).
    pub fn signed_pre_key(&self) -> &PreKeyPair {
        &self.keys.signed_pre_key
    }

    /// Raw SPK signature bytes.
    pub fn spk_signature(&self) -> [u8; 64] {
        self.keys.spk_signature
    }

    /// Generate `count` fresh one-time pre-keys, append them to the local
    /// pool, and return the upload body for the relay.
    pub fn replenish_one_time_prekeys(
        &mut self,
        env: &impl Environment,
        count: usize,
    ) -> PreKeyUpload {
        let fresh = identity::generate_one_time_prekeys(env, count);
        let upload = PreKeyUpload {
            one_time_pre_keys: fresh.iter().map(|k| codec::encode(k.public().as_bytes())).collect(),
        };
        self.keys.one_time_pre_keys.extend(fresh);
        upload
    }

    /// Persist the identity blob.
    pub fn save(&self, store: &BlobStore) -> Result<(), ClientError> {
        let blob = IdentityBlob {
            moltbot_id: self.moltbot_id.clone(),
            public_key: codec::encode(self.keys.identity.verifying_key().as_bytes()),
            private_key: codec::encode(self.keys.identity.secret_bytes()),
            signed_pre_key: SignedPreKeyBlob {
                public: codec::encode(self.keys.signed_pre_key.public().as_bytes()),
                private: Some(codec::encode(self.keys.signed_pre_key.secret_bytes())),
                signature: codec::encode(self.keys.spk_signature),
            },
            one_time_pre_keys: self
                .keys
                .one_time_pre_keys
                .iter()
                .map(|k| OneTimePreKeyBlob {
                    public: codec::encode(k.public().as_bytes()),
                    private: codec::encode(k.secret_bytes()),
                })
                .collect(),
        };

        let bytes = serde_json::to_vec(&blob)
            .map_err(|e| ClientError::Wire { reason: e.to_string() })?;
        store.set(IDENTITY_KEY, &bytes)?;
        Ok(())
    }

    /// Load the identity blob, if one exists.
    ///
    /// # Errors
    ///
    /// - `Identity` if the blob parses but lacks the SPK private (a
    ///   non-decrypting identity from before SPK privates were persisted)
    /// - `Wire` if the blob is corrupt
    pub fn load(store: &BlobStore) -> Result<Option<Self>, ClientError> {
        let Some(bytes) = store.get(IDENTITY_KEY)? else {
            return Ok(None);
        };

        let blob: IdentityBlob = serde_json::from_slice(&bytes)
            .map_err(|e| ClientError::Wire { reason: format!("identity blob: {e}") })?;

        let Some(spk_private) = blob.signed_pre_key.private else {
            return Err(ClientError::Identity {
                reason: "signed pre-key private is missing; identity cannot decrypt".to_string(),
            });
        };

        let identity_pair =
            IdentityKeyPair::from_secret_bytes(codec::decode_exact::<32>(&blob.private_key)?);
        let signed_pre_key =
            PreKeyPair::from_secret_bytes(codec::decode_exact::<32>(&spk_private)?);
        let spk_signature = codec::decode_exact::<64>(&blob.signed_pre_key.signature)?;

        let one_time_pre_keys = blob
            .one_time_pre_keys
            .iter()
            .map(|k| Ok(PreKeyPair::from_secret_bytes(codec::decode_exact::<32>(&k.private)?)))
            .collect::<Result<Vec<_>, ClientError>>()?;

        Ok(Some(Self {
            moltbot_id: blob.moltbot_id,
            keys: IdentityKeys {
                identity: identity_pair,
                signed_pre_key,
                spk_signature,
                one_time_pre_keys,
            },
        }))
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentityBlob {
    moltbot_id: MoltbotId,
    public_key: String,
    private_key: String,
    signed_pre_key: SignedPreKeyBlob,
    #[serde(default)]
    one_time_pre_keys: Vec<OneTimePreKeyBlob>,
}

#[derive(Serialize, Deserialize)]
struct SignedPreKeyBlob {
    public: String,
    #[serde(default)]
    private: Option<String>,
    signature: String,
}

#[derive(Serialize, Deserialize)]
struct OneTimePreKeyBlob {
    public: String,
    private: String,
}
