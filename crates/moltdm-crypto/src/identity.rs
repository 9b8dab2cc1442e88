//! Long-term identity and pre-key material
//!
//! Each client owns an Ed25519 identity key pair (request signing, pre-key
//! attestation), an X25519 signed pre-key (the static recipient key for
//! sender-key wraps), and a pool of one-time X25519 pre-keys. The pre-key
//! signature is Ed25519 over the raw 32-byte SPK public.
//!
//! One-time pre-keys are generated, published, and consumed at most once by
//! peers, but the wrap protocol itself only uses the SPK; the pool is held
//! for an X3DH upgrade of the wrap derivation.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use thiserror::Error;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::env::Environment;

/// One-time pre-keys generated at registration.
pub const DEFAULT_ONE_TIME_PREKEY_COUNT: usize = 10;

/// Errors from identity key handling
#[derive(Debug, Error)]
pub enum IdentityError {
    /// Key bytes did not parse as a valid key
    #[error("invalid key material: {0}")]
    InvalidKey(String),

    /// The pre-key signature did not verify against the identity key
    #[error("pre-key signature verification failed")]
    BadPreKeySignature,
}

/// Ed25519 identity key pair.
///
/// Signs relay requests and attests the signed pre-key. Stable for the
/// life of the identity.
pub struct IdentityKeyPair {
    signing: SigningKey,
}

impl IdentityKeyPair {
    /// Generate a fresh identity key pair.
    pub fn generate(env: &impl Environment) -> Self {
        Self { signing: SigningKey::from_bytes(&env.random_array()) }
    }

    /// Reconstruct from persisted secret bytes.
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        Self { signing: SigningKey::from_bytes(&bytes) }
    }

    /// The 32-byte secret, for persistence and device pairing.
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.signing.to_bytes()
    }

    /// Public verification key.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing.verifying_key()
    }

    /// Sign arbitrary bytes with the identity key.
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing.sign(message)
    }
}

impl std::fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityKeyPair").field("public", &self.verifying_key()).finish()
    }
}

/// X25519 pre-key pair (signed pre-key or one-time pre-key).
pub struct PreKeyPair {
    secret: StaticSecret,
}

impl PreKeyPair {
    /// Generate a fresh pre-key pair.
    pub fn generate(env: &impl Environment) -> Self {
        Self { secret: StaticSecret::from(env.random_array::<32>()) }
    }

    /// Reconstruct from persisted secret bytes.
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        Self { secret: StaticSecret::from(bytes) }
    }

    /// The X25519 public half.
    pub fn public(&self) -> PublicKey {
        PublicKey::from(&self.secret)
    }

    /// The 32-byte secret, for persistence and device pairing.
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret.to_bytes()
    }

    /// Borrow the secret for ECDH (sender-key unwrap).
    pub fn secret(&self) -> &StaticSecret {
        &self.secret
    }
}

impl std::fmt::Debug for PreKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreKeyPair").field("public", &self.public()).finish()
    }
}

/// Sign a pre-key public with the identity key.
///
/// The signature covers exactly the raw 32-byte X25519 public.
pub fn sign_prekey(identity: &IdentityKeyPair, spk_public: &PublicKey) -> Signature {
    identity.sign(spk_public.as_bytes())
}

/// Verify a published pre-key signature.
pub fn verify_prekey(
    identity_public: &VerifyingKey,
    spk_public: &PublicKey,
    signature: &Signature,
) -> Result<(), IdentityError> {
    identity_public
        .verify(spk_public.as_bytes(), signature)
        .map_err(|_| IdentityError::BadPreKeySignature)
}

/// Generate a batch of one-time pre-key pairs.
pub fn generate_one_time_prekeys(env: &impl Environment, count: usize) -> Vec<PreKeyPair> {
    (0..count).map(|_| PreKeyPair::generate(env)).collect()
}

/// Reconstruct an Ed25519 signature from its 64 raw bytes.
pub fn signature_from_bytes(bytes: [u8; 64]) -> Signature {
    Signature::from_bytes(&bytes)
}

/// Parse a 32-byte Ed25519 public key.
pub fn verifying_key_from_bytes(bytes: &[u8]) -> Result<VerifyingKey, IdentityError> {
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| IdentityError::InvalidKey(format!("expected 32 bytes, got {}", bytes.len())))?;
    VerifyingKey::from_bytes(&bytes).map_err(|e| IdentityError::InvalidKey(e.to_string()))
}

/// Parse a 32-byte X25519 public key.
pub fn x25519_public_from_bytes(bytes: &[u8]) -> Result<PublicKey, IdentityError> {
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| IdentityError::InvalidKey(format!("expected 32 bytes, got {}", bytes.len())))?;
    Ok(PublicKey::from(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::SystemEnv;

    #[test]
    fn prekey_signature_verifies() {
        let env = SystemEnv::new();
        let identity = IdentityKeyPair::generate(&env);
        let spk = PreKeyPair::generate(&env);

        let signature = sign_prekey(&identity, &spk.public());

        verify_prekey(&identity.verifying_key(), &spk.public(), &signature).unwrap();
    }

    #[test]
    fn prekey_signature_rejects_other_key() {
        let env = SystemEnv::new();
        let identity = IdentityKeyPair::generate(&env);
        let spk = PreKeyPair::generate(&env);
        let other = PreKeyPair::generate(&env);

        let signature = sign_prekey(&identity, &spk.public());

        let result = verify_prekey(&identity.verifying_key(), &other.public(), &signature);
        assert!(matches!(result, Err(IdentityError::BadPreKeySignature)));
    }

    #[test]
    fn prekey_signature_rejects_other_identity() {
        let env = SystemEnv::new();
        let identity = IdentityKeyPair::generate(&env);
        let impostor = IdentityKeyPair::generate(&env);
        let spk = PreKeyPair::generate(&env);

        let signature = sign_prekey(&identity, &spk.public());

        let result = verify_prekey(&impostor.verifying_key(), &spk.public(), &signature);
        assert!(result.is_err());
    }

    #[test]
    fn identity_roundtrips_through_secret_bytes() {
        let env = SystemEnv::new();
        let identity = IdentityKeyPair::generate(&env);

        let restored = IdentityKeyPair::from_secret_bytes(identity.secret_bytes());

        assert_eq!(identity.verifying_key(), restored.verifying_key());
    }

    #[test]
    fn prekey_roundtrips_through_secret_bytes() {
        let env = SystemEnv::new();
        let spk = PreKeyPair::generate(&env);

        let restored = PreKeyPair::from_secret_bytes(spk.secret_bytes());

        assert_eq!(spk.public(), restored.public());
    }

    #[test]
    fn one_time_prekeys_are_distinct() {
        let env = SystemEnv::new();

        let keys = generate_one_time_prekeys(&env, DEFAULT_ONE_TIME_PREKEY_COUNT);

        assert_eq!(keys.len(), 10);
        for (i, a) in keys.iter().enumerate() {
            for b in &keys[i + 1..] {
                assert_ne!(a.public(), b.public());
            }
        }
    }

    #[test]
    fn public_key_parsing_rejects_wrong_length() {
        assert!(verifying_key_from_bytes(&[0u8; 31]).is_err());
        assert!(x25519_public_from_bytes(&[0u8; 33]).is_err());
    }
}
