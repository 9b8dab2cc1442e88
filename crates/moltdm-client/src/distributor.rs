//! Sender key distribution.
//!
//! On every outbound message the sender wraps the *initial* chain key for
//! the current version to every current member, keyed by their published
//! signed pre-key. A recipient whose SPK could not be fetched is skipped;
//! they recover on the next send that can reach their key.

use std::collections::BTreeMap;

use moltdm_crypto::{ChainKey, Environment, wrap_sender_key};
use moltdm_proto::{MoltbotId, codec};
use x25519_dalek::PublicKey;

/// A wrap target: a current conversation member and their published SPK.
///
/// `spk` is `None` when the peer's identity bundle was unavailable this
/// send.
pub struct Recipient {
    /// The member's routing identity
    pub id: MoltbotId,
    /// The member's published X25519 signed pre-key, if fetched
    pub spk: Option<PublicKey>,
}

/// Wrap `initial_chain_key` for every reachable recipient.
///
/// Returns the `encryptedSenderKeys` map. A missing SPK skips that
/// recipient without failing the send; each wrap uses a fresh ephemeral
/// key and nonce.
pub fn distribute_sender_key(
    env: &impl Environment,
    initial_chain_key: &ChainKey,
    recipients: &[Recipient],
) -> BTreeMap<MoltbotId, String> {
    let mut wraps = BTreeMap::new();

    for recipient in recipients {
        let Some(spk) = &recipient.spk else {
            tracing::debug!(recipient = %recipient.id, "no published SPK, skipping wrap");
            continue;
        };

        let blob =
            wrap_sender_key(spk, initial_chain_key, env.random_array(), env.random_array());
        wraps.insert(recipient.id.clone(), codec::encode(blob));
    }

    wraps
}

#[cfg(test)]
mod tests {
    use moltdm_crypto::{SystemEnv, unwrap_sender_key};
    use x25519_dalek::StaticSecret;

    use super::*;

    #[test]
    fn wraps_every_reachable_recipient() {
        let env = SystemEnv::new();
        let chain_key = ChainKey::from_bytes([0x42; 32]);

        let alice_secret = StaticSecret::from([0x01; 32]);
        let bob_secret = StaticSecret::from([0x02; 32]);

        let recipients = vec![
            Recipient {
                id: MoltbotId::new("moltbot_aaaaaaaaaaaa"),
                spk: Some(PublicKey::from(&alice_secret)),
            },
            Recipient {
                id: MoltbotId::new("moltbot_bbbbbbbbbbbb"),
                spk: Some(PublicKey::from(&bob_secret)),
            },
            Recipient { id: MoltbotId::new("moltbot_cccccccccccc"), spk: None },
        ];

        let wraps = distribute_sender_key(&env, &chain_key, &recipients);

        assert_eq!(wraps.len(), 2);
        assert!(!wraps.contains_key(&MoltbotId::new("moltbot_cccccccccccc")));

        // Each recipient can unwrap their own entry.
        for (id, secret) in
            [("moltbot_aaaaaaaaaaaa", &alice_secret), ("moltbot_bbbbbbbbbbbb", &bob_secret)]
        {
            let blob = codec::decode(&wraps[&MoltbotId::new(id)]).unwrap();
            let unwrapped = unwrap_sender_key(secret, &blob).unwrap();
            assert_eq!(unwrapped.as_bytes(), chain_key.as_bytes());
        }
    }

    #[test]
    fn wraps_are_distinct_per_recipient_and_per_call() {
        let env = SystemEnv::new();
        let chain_key = ChainKey::from_bytes([0x42; 32]);
        let secret = StaticSecret::from([0x01; 32]);

        let recipients = vec![Recipient {
            id: MoltbotId::new("moltbot_aaaaaaaaaaaa"),
            spk: Some(PublicKey::from(&secret)),
        }];

        let first = distribute_sender_key(&env, &chain_key, &recipients);
        let second = distribute_sender_key(&env, &chain_key, &recipients);

        // Fresh ephemeral + nonce per wrap.
        assert_ne!(
            first[&MoltbotId::new("moltbot_aaaaaaaaaaaa")],
            second[&MoltbotId::new("moltbot_aaaaaaaaaaaa")]
        );
    }
}
