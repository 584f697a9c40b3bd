//! Security-layer scenarios: stamping, tampering, replay, tokens,
//! revocation.

mod common;

use std::sync::Arc;
use std::time::Duration;

use weft_core::{AgentId, Message, MonotonicClock, MsgType, Priority, Role};
use weft_envelope::{AuthEnvelope, EnvelopeError, ReplayGuard};
use weft_identity::{IdentityError, IdentityStore, MasterKey};
use weft_runtime::RuntimeError;

use common::test_fabric;

fn security_fixture() -> (AuthEnvelope, AgentId, AgentId) {
    let store = Arc::new(IdentityStore::new(MasterKey::generate()));
    let (sender, _) = store.register("sender", Role::Agent).unwrap();
    let (receiver, _) = store.register("receiver", Role::Agent).unwrap();
    (
        AuthEnvelope::new(store, MonotonicClock::new()),
        sender,
        receiver,
    )
}

fn stamped(envelope: &AuthEnvelope, source: AgentId, target: AgentId) -> Message {
    let mut msg = Message::builder(MsgType::Request, Priority::High)
        .source(source)
        .target(target)
        .payload(b"transfer 100".to_vec())
        .build()
        .unwrap();
    envelope.stamp(&mut msg, source).unwrap();
    msg
}

#[test]
fn every_single_bit_flip_is_detected() {
    let (envelope, sender, receiver) = security_fixture();
    let msg = stamped(&envelope, sender, receiver);
    let wire = msg.encode();
    envelope.verify(&msg).expect("untouched message verifies");

    // Flip each payload bit and each covered header bit in turn. The tag
    // field itself (bytes 40..56) is also covered: changing it must fail.
    for byte in 0..wire.len() {
        for bit in 0..8u8 {
            let mut tampered_wire = wire.clone();
            tampered_wire[byte] ^= 1 << bit;
            // Some header flips break decoding outright; those are equally
            // rejected, just earlier.
            let Ok(tampered) = Message::decode(&tampered_wire) else {
                continue;
            };
            if tampered == msg {
                continue;
            }
            assert!(
                envelope.verify(&tampered).is_err(),
                "bit {bit} of byte {byte} flipped but verify passed"
            );
        }
    }
}

#[test]
fn replay_of_accepted_id_is_rejected_and_first_stays_valid() {
    let (envelope, sender, receiver) = security_fixture();
    let _ = receiver;
    let mut guard = ReplayGuard::new();

    // Accept a run of messages, then replay the 100th.
    let mut kept = None;
    for i in 0..100 {
        let msg = stamped(&envelope, sender, AgentId::new(2));
        envelope.verify_inbound(&msg, &mut guard).unwrap();
        if i == 99 {
            kept = Some(msg);
        }
    }
    let replayed = kept.expect("kept message");
    assert!(matches!(
        envelope.verify_inbound(&replayed, &mut guard),
        Err(EnvelopeError::ReplayDetected { msg_id: 100, .. })
    ));
    // The original acceptance is unaffected: later traffic still flows.
    let next = stamped(&envelope, sender, AgentId::new(2));
    envelope.verify_inbound(&next, &mut guard).unwrap();
}

#[test]
fn token_ttl_boundary() {
    let store = IdentityStore::new(MasterKey::generate());
    let (id, _) = store.register("worker", Role::Agent).unwrap();

    // Accepted inside the ttl.
    let token = store.issue_token(id, chrono::Duration::minutes(5)).unwrap();
    let claims = store.verify_token(&token).unwrap();
    assert_eq!(claims.subject, id);
    assert_eq!(claims.role, Role::Agent);

    // Rejected once past it.
    let expired = store.issue_token(id, chrono::Duration::seconds(-1)).unwrap();
    assert!(matches!(
        store.verify_token(&expired),
        Err(IdentityError::Expired { .. })
    ));
}

#[test]
fn revocation_is_idempotent_and_stable() {
    let store = IdentityStore::new(MasterKey::generate());
    let (id, _) = store.register("victim", Role::Agent).unwrap();
    let token = store.issue_token(id, chrono::Duration::hours(1)).unwrap();

    store.revoke(id).unwrap();
    let first = store.verify_token(&token);
    store.revoke(id).unwrap();
    let second = store.verify_token(&token);
    assert!(matches!(first, Err(IdentityError::IdentityRevoked(_))));
    assert!(matches!(second, Err(IdentityError::IdentityRevoked(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn revoked_agent_cannot_send_through_the_fabric() {
    let fabric = test_fabric();
    let target = fabric.register_agent("target", Role::Agent).unwrap().start().unwrap();
    let mole = fabric.register_agent("mole", Role::Agent).unwrap().start().unwrap();

    fabric.identities().revoke(mole.id()).unwrap();

    let msg = Message::builder(MsgType::Request, Priority::Medium)
        .source(mole.id())
        .target(target.id())
        .payload(b"exfil".to_vec())
        .build()
        .unwrap();
    assert!(matches!(
        mole.send(msg).await,
        Err(RuntimeError::Envelope(EnvelopeError::Revoked(_)))
    ));

    fabric.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn verify_succeeds_for_every_active_identity() {
    // stamp then verify always holds for an active binding.
    let (envelope, sender, receiver) = security_fixture();
    for _ in 0..1000 {
        let msg = stamped(&envelope, sender, receiver);
        envelope.verify(&msg).expect("stamp/verify round-trips");
    }
}
