//! Identity bindings: one active record per agent id.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use weft_core::{AgentId, AgentName, PermissionSet, Role};

use crate::pattern::ResourcePattern;
use crate::secret::SessionSecret;

/// One agent's identity: role, permissions, session secret, validity.
///
/// Bindings are immutable; rotation and permission changes publish a new
/// binding for the same id (copy-on-write), and the replaced secret is
/// zeroized when its last reference drops.
#[derive(Debug, Clone)]
pub struct IdentityBinding {
    /// Stable agent id.
    pub agent_id: AgentId,
    /// Display name, logs only.
    pub name: AgentName,
    /// Assigned role.
    pub role: Role,
    /// Effective permission mask. Starts as the role's mask; later grants
    /// replace the binding.
    pub permissions: PermissionSet,
    /// Optional resource scope; `None` is unscoped.
    pub resource_scope: Option<ResourcePattern>,
    /// HMAC key for this agent's messages.
    pub session_secret: Arc<SessionSecret>,
    /// Secret derivation generation; bumped on rotation, 0 after restart.
    pub generation: u32,
    /// When this binding was issued.
    pub issued_at: DateTime<Utc>,
    /// Optional binding expiry.
    pub expires_at: Option<DateTime<Utc>>,
    /// Revocation is terminal for the id.
    pub revoked: bool,
}

impl IdentityBinding {
    /// Whether the binding can authenticate messages right now.
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && self.expires_at.is_none_or(|exp| now < exp)
    }
}
