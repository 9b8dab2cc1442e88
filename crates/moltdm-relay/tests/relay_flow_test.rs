//! Relay core flows: registration, pre-keys, conversations, membership,
//! message ordering, expiry, poll cursors, and pairing.

mod common;

use common::{T0, TestEnv};
use moltdm_client::IdentityKeys;
use moltdm_proto::{
    CreateConversationRequest, ConversationType, MembershipEventKind, MoltbotId, PairKeysRequest,
    PairSubmitRequest, PairingStatus, SendMessageRequest, codec,
};
use moltdm_relay::{MemoryStorage, Relay, RelayError, Storage};

fn new_relay() -> (Relay<MemoryStorage, TestEnv>, TestEnv) {
    let env = TestEnv::at(T0);
    (Relay::new(MemoryStorage::new(), env.clone()), env)
}

fn register(relay: &Relay<MemoryStorage, TestEnv>, env: &TestEnv) -> MoltbotId {
    let keys = IdentityKeys::generate(env);
    relay.register_identity(&keys.register_request()).unwrap().id
}

fn message(text: &str) -> SendMessageRequest {
    SendMessageRequest {
        ciphertext: codec::encode(text.as_bytes()),
        sender_key_version: 1,
        message_index: 0,
        reply_to: None,
        expires_in: None,
        encrypted_sender_keys: None,
    }
}

#[test]
fn registration_assigns_wellformed_id() {
    let (relay, env) = new_relay();

    let id = register(&relay, &env);

    let suffix = id.as_str().strip_prefix("moltbot_").unwrap();
    assert_eq!(suffix.len(), 12);
    assert!(suffix.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));

    // The bundle is publicly fetchable.
    let bundle = relay.identity(&id).unwrap();
    assert_eq!(bundle.one_time_pre_keys.len(), 10);
}

#[test]
fn registration_rejects_malformed_keys() {
    let (relay, env) = new_relay();

    let mut request = IdentityKeys::generate(&env).register_request();
    request.public_key = "AAAA".to_string(); // 3 bytes, not 32

    let result = relay.register_identity(&request);
    assert!(matches!(result, Err(RelayError::Validation(_))));
}

#[test]
fn prekeys_consume_in_order_then_run_dry() {
    let (relay, env) = new_relay();
    let id = register(&relay, &env);

    let expected = relay.identity(&id).unwrap().one_time_pre_keys;

    assert_eq!(relay.consume_prekey(&id).unwrap().pre_key.as_deref(), Some(expected[0].as_str()));
    assert_eq!(relay.consume_prekey(&id).unwrap().pre_key.as_deref(), Some(expected[1].as_str()));

    for _ in 2..10 {
        assert!(relay.consume_prekey(&id).unwrap().pre_key.is_some());
    }
    assert_eq!(relay.consume_prekey(&id).unwrap().pre_key, None);

    // Unknown identities are a 404, not an empty pool.
    let unknown = MoltbotId::new("moltbot_ffffffffffff");
    assert!(matches!(relay.consume_prekey(&unknown), Err(RelayError::NotFound(_))));
}

#[test]
fn prekey_upload_is_owner_only() {
    let (relay, env) = new_relay();
    let alice = register(&relay, &env);
    let mallory = register(&relay, &env);

    let upload = moltdm_proto::PreKeyUpload { one_time_pre_keys: vec![codec::encode([7u8; 32])] };

    assert!(matches!(
        relay.append_prekeys(&mallory, &alice, &upload),
        Err(RelayError::Forbidden(_))
    ));

    let updated = relay.append_prekeys(&alice, &alice, &upload).unwrap();
    assert_eq!(updated.one_time_pre_keys.len(), 11);
}

#[test]
fn conversation_creation_and_access_control() {
    let (relay, env) = new_relay();
    let alice = register(&relay, &env);
    let bob = register(&relay, &env);
    let eve = register(&relay, &env);

    let conversation = relay
        .create_conversation(
            &alice,
            &CreateConversationRequest { member_ids: vec![bob.clone()], name: None, kind: None },
        )
        .unwrap();

    assert!(conversation.id.starts_with("conv_"));
    assert_eq!(conversation.kind, ConversationType::Dm);
    assert_eq!(conversation.members, vec![alice.clone(), bob.clone()]);
    assert_eq!(conversation.admins, vec![alice.clone()]);
    assert_eq!(conversation.sender_key_version, 1);

    // Members see it; outsiders get a 403.
    relay.conversation(&bob, &conversation.id).unwrap();
    assert!(matches!(
        relay.conversation(&eve, &conversation.id),
        Err(RelayError::Forbidden(_))
    ));

    // Unregistered members are rejected up front.
    let result = relay.create_conversation(
        &alice,
        &CreateConversationRequest {
            member_ids: vec![MoltbotId::new("moltbot_000000000000")],
            name: None,
            kind: None,
        },
    );
    assert!(matches!(result, Err(RelayError::Validation(_))));
}

#[test]
fn membership_changes_record_events_and_bump_version() {
    let (relay, env) = new_relay();
    let alice = register(&relay, &env);
    let bob = register(&relay, &env);
    let carol = register(&relay, &env);

    let conversation = relay
        .create_conversation(
            &alice,
            &CreateConversationRequest { member_ids: vec![bob.clone()], name: None, kind: None },
        )
        .unwrap();

    // Only admins may add.
    assert!(matches!(
        relay.add_member(&bob, &conversation.id, &carol),
        Err(RelayError::Forbidden(_))
    ));
    let updated = relay.add_member(&alice, &conversation.id, &carol).unwrap();
    assert!(updated.is_member(&carol));
    assert_eq!(updated.sender_key_version, 1);

    // Removal bumps the advisory version.
    let updated = relay.remove_member(&alice, &conversation.id, &carol).unwrap();
    assert!(!updated.is_member(&carol));
    assert_eq!(updated.sender_key_version, 2);

    // The event log tells the story in order.
    let events = relay.storage().events_after(&conversation.id, 0).unwrap();
    let kinds: Vec<MembershipEventKind> = events.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        [
            MembershipEventKind::ConversationCreated,
            MembershipEventKind::MemberAdded,
            MembershipEventKind::MemberRemoved,
        ]
    );
    assert_eq!(events.iter().map(|e| e.seq).collect::<Vec<_>>(), [1, 2, 3]);

    // A removed member no longer reads the conversation.
    assert!(matches!(
        relay.conversation(&carol, &conversation.id),
        Err(RelayError::Forbidden(_))
    ));
}

#[test]
fn admin_grant_revoke_rename_and_delete() {
    let (relay, env) = new_relay();
    let alice = register(&relay, &env);
    let bob = register(&relay, &env);

    let conversation = relay
        .create_conversation(
            &alice,
            &CreateConversationRequest { member_ids: vec![bob.clone()], name: None, kind: None },
        )
        .unwrap();

    // Non-admins cannot rename; admins can.
    let rename = moltdm_proto::UpdateConversationRequest { name: Some("ops".to_string()) };
    assert!(matches!(
        relay.update_conversation(&bob, &conversation.id, &rename),
        Err(RelayError::Forbidden(_))
    ));
    let updated = relay.update_conversation(&alice, &conversation.id, &rename).unwrap();
    assert_eq!(updated.name.as_deref(), Some("ops"));

    // Promote bob, then the original admin can step down.
    let updated = relay.add_admin(&alice, &conversation.id, &bob).unwrap();
    assert!(updated.is_admin(&bob));
    let updated = relay.remove_admin(&bob, &conversation.id, &alice).unwrap();
    assert!(!updated.is_admin(&alice));

    // The last admin cannot be demoted.
    assert!(matches!(
        relay.remove_admin(&bob, &conversation.id, &bob),
        Err(RelayError::Validation(_))
    ));

    // Only admins may delete; deletion cascades.
    assert!(matches!(
        relay.delete_conversation(&alice, &conversation.id),
        Err(RelayError::Forbidden(_))
    ));
    relay.delete_conversation(&bob, &conversation.id).unwrap();
    assert!(matches!(
        relay.conversation(&alice, &conversation.id),
        Err(RelayError::NotFound(_))
    ));
}

#[test]
fn leaving_is_allowed_for_non_admins_and_empties_delete() {
    let (relay, env) = new_relay();
    let alice = register(&relay, &env);
    let bob = register(&relay, &env);

    let conversation = relay
        .create_conversation(
            &alice,
            &CreateConversationRequest { member_ids: vec![bob.clone()], name: None, kind: None },
        )
        .unwrap();

    // bob is not an admin but may remove himself.
    relay.remove_member(&bob, &conversation.id, &bob).unwrap();

    // Last member leaves: the conversation and its records go away.
    relay.remove_member(&alice, &conversation.id, &alice).unwrap();
    assert!(matches!(
        relay.conversation(&alice, &conversation.id),
        Err(RelayError::NotFound(_))
    ));
}

#[test]
fn messages_deliver_in_order_with_since_filter() {
    let (relay, env) = new_relay();
    let alice = register(&relay, &env);
    let bob = register(&relay, &env);

    let conversation = relay
        .create_conversation(
            &alice,
            &CreateConversationRequest { member_ids: vec![bob.clone()], name: None, kind: None },
        )
        .unwrap();

    relay.post_message(&alice, &conversation.id, &message("one")).unwrap();
    env.advance(10);
    let second = relay.post_message(&bob, &conversation.id, &message("two")).unwrap();
    env.advance(10);
    relay.post_message(&alice, &conversation.id, &message("three")).unwrap();

    let all = relay.messages(&bob, &conversation.id, None, None).unwrap();
    let texts: Vec<Vec<u8>> =
        all.iter().map(|r| codec::decode(&r.ciphertext).unwrap()).collect();
    assert_eq!(texts, [b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]);

    // `since` is inclusive by createdAt.
    let tail = relay.messages(&bob, &conversation.id, Some(second.created_at), None).unwrap();
    assert_eq!(tail.len(), 2);

    // Non-members cannot read.
    let eve = register(&relay, &env);
    assert!(matches!(
        relay.messages(&eve, &conversation.id, None, None),
        Err(RelayError::Forbidden(_))
    ));
}

#[test]
fn expired_messages_are_filtered_then_purged() {
    let (relay, env) = new_relay();
    let alice = register(&relay, &env);

    let conversation = relay
        .create_conversation(
            &alice,
            &CreateConversationRequest { member_ids: vec![alice.clone()], name: None, kind: None },
        )
        .unwrap();

    let mut expiring = message("soon gone");
    expiring.expires_in = Some(30);
    relay.post_message(&alice, &conversation.id, &expiring).unwrap();
    relay.post_message(&alice, &conversation.id, &message("stays")).unwrap();

    assert_eq!(relay.messages(&alice, &conversation.id, None, None).unwrap().len(), 2);

    env.advance(31_000);
    assert_eq!(relay.messages(&alice, &conversation.id, None, None).unwrap().len(), 1);

    assert_eq!(relay.purge_expired().unwrap(), 1);
    assert_eq!(relay.purge_expired().unwrap(), 0);
}

#[test]
fn poll_is_cursor_driven_and_idempotent() {
    let (relay, env) = new_relay();
    let alice = register(&relay, &env);
    let bob = register(&relay, &env);

    let conversation = relay
        .create_conversation(
            &alice,
            &CreateConversationRequest { member_ids: vec![bob.clone()], name: None, kind: None },
        )
        .unwrap();
    relay.post_message(&alice, &conversation.id, &message("hello")).unwrap();

    let first = relay.poll(&bob).unwrap();
    assert_eq!(first.conversations.len(), 1);
    assert_eq!(first.conversations[0].messages.len(), 1);
    assert_eq!(first.conversations[0].events.len(), 1); // conversationCreated

    // Nothing new: the repeat poll is empty.
    assert!(relay.poll(&bob).unwrap().conversations.is_empty());

    env.advance(10);
    relay.post_message(&alice, &conversation.id, &message("again")).unwrap();

    let third = relay.poll(&bob).unwrap();
    assert_eq!(third.conversations.len(), 1);
    assert_eq!(third.conversations[0].messages.len(), 1);
    assert!(third.conversations[0].events.is_empty());
}

#[test]
fn pairing_lifecycle_and_expiry() {
    let (relay, env) = new_relay();
    let alice = register(&relay, &env);

    let submit = PairSubmitRequest {
        token: "pair_5f2c9a1b7d3e".to_string(),
        device_public_key: codec::encode([9u8; 32]),
    };
    assert_eq!(relay.pair_submit(&submit).unwrap().status, PairingStatus::Pending);

    // Token reuse is rejected.
    assert!(matches!(relay.pair_submit(&submit), Err(RelayError::Validation(_))));

    let status = relay.pair_status(&submit.token).unwrap();
    assert_eq!(status.status, PairingStatus::Pending);
    assert!(status.encryption_keys.is_none());

    let keys = PairKeysRequest { encryption_keys: codec::encode(b"sealed snapshot blob") };
    relay.pair_attach_keys(&alice, &submit.token, &keys).unwrap();

    let status = relay.pair_status(&submit.token).unwrap();
    assert_eq!(status.status, PairingStatus::Ready);
    assert_eq!(status.encryption_keys.as_deref(), Some(keys.encryption_keys.as_str()));
    assert_eq!(status.moltbot_id.as_ref(), Some(&alice));

    // A token ages out five minutes after submission.
    let late = PairSubmitRequest {
        token: "pair_aaaa11112222".to_string(),
        device_public_key: codec::encode([9u8; 32]),
    };
    relay.pair_submit(&late).unwrap();
    env.advance(5 * 60 * 1000);

    assert_eq!(relay.pair_status(&late.token).unwrap().status, PairingStatus::Expired);
    assert!(matches!(
        relay.pair_attach_keys(&alice, &late.token, &keys),
        Err(RelayError::Validation(_))
    ));

    assert!(matches!(relay.pair_status("pair_unknown"), Err(RelayError::NotFound(_))));
}
