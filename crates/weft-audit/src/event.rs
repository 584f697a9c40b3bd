//! Audit event types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use weft_core::AgentId;

/// What went wrong. Stable names; used in counters and serialized records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    /// Authentication tag mismatch.
    BadMac,
    /// Header named a source with no binding.
    UnknownSource,
    /// Source binding was revoked.
    Revoked,
    /// Message id replayed or below the window.
    ReplayDetected,
    /// Source lacked a required permission.
    PermissionDenied,
    /// No route to the addressed target.
    NoRoute,
    /// Response arrived after its caller gave up.
    OrphanResponse,
    /// A handler failed; the message was discarded, the agent kept running.
    HandlerFailure,
    /// A delivery was dropped because the target's inbox was full.
    InboxFull,
    /// The Emergency ring reported full. Fatal invariant violation.
    EmergencyFull,
}

impl AuditKind {
    /// Stable snake_case name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::BadMac => "bad_mac",
            Self::UnknownSource => "unknown_source",
            Self::Revoked => "revoked",
            Self::ReplayDetected => "replay_detected",
            Self::PermissionDenied => "permission_denied",
            Self::NoRoute => "no_route",
            Self::OrphanResponse => "orphan_response",
            Self::HandlerFailure => "handler_failure",
            Self::InboxFull => "inbox_full",
            Self::EmergencyFull => "emergency_full",
        }
    }
}

impl std::fmt::Display for AuditKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One audit record, bearing the offending message's identity as claimed
/// in its header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// What happened.
    pub kind: AuditKind,
    /// Source as claimed by the message header (which, for a forged
    /// message, is the best identification available).
    pub source: AgentId,
    /// The message id the event concerns; 0 when there is none.
    pub msg_id: u64,
    /// Target involved, when routing was the problem.
    pub target: Option<AgentId>,
    /// Wall-clock time of the event.
    pub at: DateTime<Utc>,
    /// Free-form context for the operator.
    pub detail: Option<String>,
}

impl AuditEvent {
    /// Build an event stamped with the current time.
    #[must_use]
    pub fn new(kind: AuditKind, source: AgentId, msg_id: u64) -> Self {
        Self {
            kind,
            source,
            msg_id,
            target: None,
            at: Utc::now(),
            detail: None,
        }
    }

    /// Attach the target the event concerns.
    #[must_use]
    pub fn with_target(mut self, target: AgentId) -> Self {
        self.target = Some(target);
        self
    }

    /// Attach operator-facing context.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}
