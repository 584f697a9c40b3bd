//! The control interface: agent 0 executes administrative operations.
//!
//! Control messages are `Request`s addressed to the reserved agent id 0
//! with a JSON payload. Every operation is gated on the `Admin`
//! permission of the *sending* identity; denials are audited and answered
//! with a [`ControlReply::Denied`].

use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use tracing::info;

use weft_audit::{AuditEvent, AuditKind};
use weft_core::{AgentId, Permission, Role};
use weft_telemetry::MetricsSnapshot;

use crate::agent::AgentHandle;
use crate::error::{RuntimeError, RuntimeResult};
use crate::fabric::Fabric;
use crate::handler::{FnHandler, HandlerFailure};

/// Administrative operations accepted by agent 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ControlRequest {
    /// Bind a new identity and issue its session token.
    RegisterAgent {
        /// Display name for the new agent.
        name: String,
        /// Role, fixing the permission mask.
        role: Role,
    },
    /// Revoke an identity. Terminal.
    RevokeAgent {
        /// The agent to revoke.
        agent: u16,
    },
    /// Rotate an identity's session secret.
    RotateKey {
        /// The agent whose key rotates.
        agent: u16,
    },
    /// Request orderly fabric shutdown.
    Shutdown,
    /// Return a metrics snapshot.
    DumpMetrics,
}

/// Replies produced by the control agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ControlReply {
    /// A new identity was bound; the bearer token establishes its session.
    Registered {
        /// The assigned id.
        agent: u16,
        /// Session-establishment token, one hour ttl.
        token: String,
    },
    /// The identity was revoked.
    Revoked,
    /// The session secret was rotated.
    Rotated,
    /// Shutdown was requested; the process run loop takes it from here.
    ShutdownStarted,
    /// Counter and histogram snapshot.
    Metrics(MetricsSnapshot),
    /// The operation failed; reason attached.
    Failed {
        /// Operator-facing reason.
        reason: String,
    },
    /// The sender lacks `Admin`.
    Denied,
}

/// Register agent 0 and install the control handler.
///
/// # Errors
///
/// Identity errors when id 0 is already bound.
pub fn install_control_agent(fabric: &Fabric) -> RuntimeResult<AgentHandle> {
    let inactive = fabric.register_admin("control")?;
    inactive.register_handler(
        weft_core::MsgType::Request,
        FnHandler::new(|agent: AgentHandle, msg| async move {
            let reply = handle_control(&agent, &msg);
            serde_json::to_vec(&reply)
                .map(Some)
                .map_err(HandlerFailure::new)
        }),
    )?;
    inactive.start()
}

fn handle_control(agent: &AgentHandle, msg: &weft_core::Message) -> ControlReply {
    let fabric = &agent.fabric;
    let source = msg.source();
    if !fabric
        .identities
        .check_permission(source, Permission::Admin, None)
    {
        fabric.metrics.record_auth_failure();
        fabric.audit.emit(
            AuditEvent::new(AuditKind::PermissionDenied, source, msg.header().msg_id)
                .with_target(AgentId::ADMIN)
                .with_detail("control operation requires admin"),
        );
        return ControlReply::Denied;
    }

    let request: ControlRequest = match serde_json::from_slice(msg.payload()) {
        Ok(request) => request,
        Err(err) => {
            return ControlReply::Failed {
                reason: RuntimeError::MalformedControl(err.to_string()).to_string(),
            };
        }
    };

    match request {
        ControlRequest::RegisterAgent { name, role } => {
            let registered = fabric.identities.register(name, role).and_then(|(id, _)| {
                fabric
                    .identities
                    .issue_token(id, ChronoDuration::hours(1))
                    .map(|token| (id, token))
            });
            match registered {
                Ok((id, token)) => {
                    info!(agent = %id, by = %source, "control: agent registered");
                    ControlReply::Registered {
                        agent: id.raw(),
                        token: token.as_str().to_string(),
                    }
                }
                Err(err) => ControlReply::Failed {
                    reason: err.to_string(),
                },
            }
        }
        ControlRequest::RevokeAgent { agent: target } => {
            match fabric.identities.revoke(AgentId::new(target)) {
                Ok(()) => {
                    info!(agent = target, by = %source, "control: agent revoked");
                    ControlReply::Revoked
                }
                Err(err) => ControlReply::Failed {
                    reason: err.to_string(),
                },
            }
        }
        ControlRequest::RotateKey { agent: target } => {
            match fabric.identities.rotate_key(AgentId::new(target)) {
                Ok(_secret) => {
                    info!(agent = target, by = %source, "control: key rotated");
                    ControlReply::Rotated
                }
                Err(err) => ControlReply::Failed {
                    reason: err.to_string(),
                },
            }
        }
        ControlRequest::Shutdown => {
            info!(by = %source, "control: shutdown requested");
            fabric.request_shutdown();
            ControlReply::ShutdownStarted
        }
        ControlRequest::DumpMetrics => ControlReply::Metrics(fabric.metrics.snapshot()),
    }
}
