//! Stamping, verification, and authorization of messages.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::trace;

use weft_core::{AgentId, Message, MonotonicClock, Permission};
use weft_identity::{IdentityStore, SessionSecret};

use crate::error::{EnvelopeError, EnvelopeResult};
use crate::replay::ReplayGuard;

type HmacSha256 = Hmac<Sha256>;

/// Length of the truncated tag carried in the header.
const TAG_LEN: usize = 16;

/// The authentication envelope: stamps outbound messages and verifies
/// inbound ones against the identity store.
///
/// One envelope serves the whole fabric. Per-source message-id counters
/// live here so `msg_id` is monotonic per source regardless of which
/// thread sends.
pub struct AuthEnvelope {
    identities: Arc<IdentityStore>,
    clock: MonotonicClock,
    counters: DashMap<AgentId, AtomicU64>,
}

impl AuthEnvelope {
    /// Create an envelope over the identity store and fabric clock.
    #[must_use]
    pub fn new(identities: Arc<IdentityStore>, clock: MonotonicClock) -> Self {
        Self {
            identities,
            clock,
            counters: DashMap::new(),
        }
    }

    /// The identity store this envelope authenticates against.
    #[must_use]
    pub fn identities(&self) -> &Arc<IdentityStore> {
        &self.identities
    }

    /// Stamp an outbound message: set the source, assign the next per-source
    /// message id and the monotonic timestamp, and compute the tag.
    ///
    /// # Errors
    ///
    /// `UnknownSource` or `Revoked` when the source has no active binding.
    pub fn stamp(&self, msg: &mut Message, source: AgentId) -> EnvelopeResult<()> {
        let secret = self
            .identities
            .session_secret(source)
            .map_err(|e| EnvelopeError::from_identity(e, source))?;

        let msg_id = self
            .counters
            .entry(source)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed)
            + 1;

        let header = msg.header_mut();
        header.source = source;
        header.msg_id = msg_id;
        header.timestamp_ns = self.clock.now_ns();
        header.auth_tag = [0u8; TAG_LEN];
        let tag = compute_tag(&secret, msg);
        msg.header_mut().auth_tag = tag;
        trace!(source = %source, msg_id, "message stamped");
        Ok(())
    }

    /// Verify an inbound message's tag. Constant-time comparison; no replay
    /// tracking (see [`AuthEnvelope::verify_inbound`]).
    ///
    /// # Errors
    ///
    /// `UnknownSource`, `Revoked`, `BadMac`.
    pub fn verify(&self, msg: &Message) -> EnvelopeResult<()> {
        let source = msg.source();
        let secret = self
            .identities
            .session_secret(source)
            .map_err(|e| EnvelopeError::from_identity(e, source))?;
        let expected = compute_tag(&secret, msg);
        if expected.ct_eq(&msg.header().auth_tag).unwrap_u8() != 1 {
            return Err(EnvelopeError::BadMac {
                sender: source,
                msg_id: msg.header().msg_id,
            });
        }
        Ok(())
    }

    /// Verify an inbound message and record it in the receiver's replay
    /// guard. The guard is consulted only after the tag verifies, so an
    /// attacker cannot poison the window with forged ids.
    ///
    /// # Errors
    ///
    /// As [`AuthEnvelope::verify`], plus `ReplayDetected`.
    pub fn verify_inbound(&self, msg: &Message, replay: &mut ReplayGuard) -> EnvelopeResult<()> {
        self.verify(msg)?;
        replay.observe(msg.source(), msg.header().msg_id)
    }

    /// Authorize a message's source for `permission`, optionally scoped to
    /// a resource.
    ///
    /// # Errors
    ///
    /// `PermissionDenied`.
    pub fn authorize(
        &self,
        msg: &Message,
        permission: Permission,
        resource: Option<&str>,
    ) -> EnvelopeResult<()> {
        let source = msg.source();
        if self.identities.check_permission(source, permission, resource) {
            Ok(())
        } else {
            Err(EnvelopeError::PermissionDenied {
                sender: source,
                permission,
                resource: resource.map(String::from),
            })
        }
    }
}

impl std::fmt::Debug for AuthEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthEnvelope")
            .field("sources", &self.counters.len())
            .finish_non_exhaustive()
    }
}

/// The canonical MAC: HMAC-SHA-256 over the header with the tag zeroed,
/// then the payload, truncated to 16 bytes. Every implementation must
/// produce this form bit-for-bit.
fn compute_tag(secret: &SessionSecret, msg: &Message) -> [u8; TAG_LEN] {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(&msg.header().encode_for_mac());
    mac.update(msg.payload());
    let digest = mac.finalize().into_bytes();
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&digest[..TAG_LEN]);
    tag
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::{MsgType, Priority, Role};
    use weft_identity::MasterKey;

    fn fixture() -> (AuthEnvelope, AgentId, AgentId) {
        let store = Arc::new(IdentityStore::new(MasterKey::generate()));
        let (a, _) = store.register("alice", Role::Agent).unwrap();
        let (b, _) = store.register("bob", Role::Agent).unwrap();
        (AuthEnvelope::new(store, MonotonicClock::new()), a, b)
    }

    fn ping(source: AgentId, target: AgentId) -> Message {
        Message::builder(MsgType::Request, Priority::High)
            .source(source)
            .target(target)
            .payload(b"ping".to_vec())
            .build()
            .unwrap()
    }

    #[test]
    fn test_stamp_then_verify() {
        let (env, a, b) = fixture();
        let mut msg = ping(a, b);
        env.stamp(&mut msg, a).unwrap();
        assert_eq!(msg.header().msg_id, 1);
        env.verify(&msg).unwrap();
    }

    #[test]
    fn test_msg_ids_monotonic_per_source() {
        let (env, a, b) = fixture();
        let mut first = ping(a, b);
        let mut second = ping(a, b);
        let mut other = ping(b, a);
        env.stamp(&mut first, a).unwrap();
        env.stamp(&mut second, a).unwrap();
        env.stamp(&mut other, b).unwrap();
        assert_eq!(first.header().msg_id, 1);
        assert_eq!(second.header().msg_id, 2);
        assert_eq!(other.header().msg_id, 1);
    }

    #[test]
    fn test_payload_tamper_rejected() {
        let (env, a, b) = fixture();
        let mut msg = ping(a, b);
        env.stamp(&mut msg, a).unwrap();

        // Flip one payload bit post-stamp.
        let mut bytes = msg.encode();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let tampered = Message::decode(&bytes).unwrap();
        assert!(matches!(
            env.verify(&tampered),
            Err(EnvelopeError::BadMac { .. })
        ));
    }

    #[test]
    fn test_header_tamper_rejected() {
        let (env, a, b) = fixture();
        let mut msg = ping(a, b);
        env.stamp(&mut msg, a).unwrap();

        // Raise the claimed priority; the tag must not survive it.
        let mut bytes = msg.encode();
        bytes[5] = Priority::Emergency.as_u8();
        let tampered = Message::decode(&bytes).unwrap();
        assert!(matches!(
            env.verify(&tampered),
            Err(EnvelopeError::BadMac { .. })
        ));
    }

    #[test]
    fn test_unknown_source_rejected() {
        let (env, a, b) = fixture();
        let mut msg = ping(a, b);
        env.stamp(&mut msg, a).unwrap();
        assert!(matches!(
            env.stamp(&mut ping(a, b), AgentId::new(999)),
            Err(EnvelopeError::UnknownSource(_))
        ));
    }

    #[test]
    fn test_revoked_source_rejected() {
        let (env, a, b) = fixture();
        let mut msg = ping(a, b);
        env.stamp(&mut msg, a).unwrap();
        env.identities().revoke(a).unwrap();
        assert!(matches!(env.verify(&msg), Err(EnvelopeError::Revoked(_))));
        assert!(matches!(
            env.stamp(&mut ping(a, b), a),
            Err(EnvelopeError::Revoked(_))
        ));
    }

    #[test]
    fn test_replay_detected_on_second_delivery() {
        let (env, a, b) = fixture();
        let mut msg = ping(a, b);
        env.stamp(&mut msg, a).unwrap();
        let mut guard = ReplayGuard::new();
        env.verify_inbound(&msg, &mut guard).unwrap();
        assert!(matches!(
            env.verify_inbound(&msg, &mut guard),
            Err(EnvelopeError::ReplayDetected { .. })
        ));
    }

    #[test]
    fn test_forged_id_does_not_poison_window() {
        let (env, a, b) = fixture();
        let mut guard = ReplayGuard::new();

        // Forge a huge msg_id with a bad tag; verification fails before the
        // window is consulted.
        let mut forged = ping(a, b);
        forged.header_mut().msg_id = 1_000_000;
        assert!(env.verify_inbound(&forged, &mut guard).is_err());

        // The legitimate stream is unaffected.
        let mut msg = ping(a, b);
        env.stamp(&mut msg, a).unwrap();
        env.verify_inbound(&msg, &mut guard).unwrap();
    }

    #[test]
    fn test_authorize_by_role() {
        let (env, a, b) = fixture();
        let mut msg = ping(a, b);
        env.stamp(&mut msg, a).unwrap();
        env.authorize(&msg, Permission::Write, None).unwrap();
        assert!(matches!(
            env.authorize(&msg, Permission::Admin, None),
            Err(EnvelopeError::PermissionDenied { .. })
        ));
    }

    #[test]
    fn test_rotation_invalidates_in_flight() {
        let (env, a, b) = fixture();
        let mut msg = ping(a, b);
        env.stamp(&mut msg, a).unwrap();
        env.identities().rotate_key(a).unwrap();
        assert!(matches!(env.verify(&msg), Err(EnvelopeError::BadMac { .. })));
    }
}
