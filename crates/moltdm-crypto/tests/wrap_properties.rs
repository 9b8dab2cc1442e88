//! Property-based tests for the sender-key wrap
//!
//! For any 32-byte chain key and any valid recipient key pair:
//! `unwrap(wrap(ck, pk), sk) == ck`, the blob is exactly 92 bytes, and a
//! wrap addressed to one recipient never opens for another.

use moltdm_crypto::{ChainKey, unwrap_sender_key, wrap_sender_key};
use proptest::prelude::*;
use x25519_dalek::{PublicKey, StaticSecret};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_wrap_unwrap_roundtrip(
        chain_key in any::<[u8; 32]>(),
        recipient_secret in any::<[u8; 32]>(),
        ephemeral_secret in any::<[u8; 32]>(),
        nonce in any::<[u8; 12]>(),
    ) {
        let spk_secret = StaticSecret::from(recipient_secret);
        let spk_public = PublicKey::from(&spk_secret);
        let ck = ChainKey::from_bytes(chain_key);

        let blob = wrap_sender_key(&spk_public, &ck, ephemeral_secret, nonce);
        prop_assert_eq!(blob.len(), 92);

        let unwrapped = unwrap_sender_key(&spk_secret, &blob).unwrap();
        prop_assert_eq!(unwrapped.as_bytes(), &chain_key);
    }

    #[test]
    fn prop_wrap_does_not_open_for_other_recipient(
        chain_key in any::<[u8; 32]>(),
        recipient_secret in any::<[u8; 32]>(),
        other_secret in any::<[u8; 32]>(),
        ephemeral_secret in any::<[u8; 32]>(),
        nonce in any::<[u8; 12]>(),
    ) {
        // Clamping can collapse distinct raw secrets onto one scalar;
        // compare the resulting publics, not the input bytes.
        let spk_public = PublicKey::from(&StaticSecret::from(recipient_secret));
        let other_public = PublicKey::from(&StaticSecret::from(other_secret));
        prop_assume!(spk_public != other_public);

        let ck = ChainKey::from_bytes(chain_key);

        let blob = wrap_sender_key(&spk_public, &ck, ephemeral_secret, nonce);

        let result = unwrap_sender_key(&StaticSecret::from(other_secret), &blob);
        prop_assert!(result.is_err());
    }
}
