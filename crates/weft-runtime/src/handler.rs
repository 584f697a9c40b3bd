//! Handler trait and closure adapter.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use weft_core::Message;

use crate::agent::AgentHandle;

/// A handler failure. Failures are isolated: the offending message is
/// audited and dropped, and the agent stays active.
#[derive(Debug, Error)]
#[error("handler failure: {0}")]
pub struct HandlerFailure(pub String);

impl HandlerFailure {
    /// Build a failure from any displayable cause.
    pub fn new(cause: impl std::fmt::Display) -> Self {
        Self(cause.to_string())
    }
}

/// What a handler produced: optional reply bytes.
///
/// For a `Request` (or `Task`) carrying a correlation id, `Some(bytes)`
/// makes the runtime send the matching `Response` (or `Result`) back to
/// the source at the request's priority. `None` means no reply.
pub type HandlerOutcome = Result<Option<Vec<u8>>, HandlerFailure>;

/// A message handler, registered per message type before the agent starts.
///
/// Handlers run on the agent's cooperative drain task: they must suspend
/// only on fabric primitives (RPC futures, sends under back-pressure),
/// never on OS locks shared with other agents.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one verified inbound message.
    async fn handle(&self, agent: AgentHandle, msg: Arc<Message>) -> HandlerOutcome;
}

/// Adapter turning an async closure into a [`MessageHandler`].
pub struct FnHandler<F> {
    f: F,
}

impl<F, Fut> FnHandler<F>
where
    F: Fn(AgentHandle, Arc<Message>) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerOutcome> + Send,
{
    /// Wrap a closure.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(AgentHandle, Arc<Message>) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerOutcome> + Send,
{
    async fn handle(&self, agent: AgentHandle, msg: Arc<Message>) -> HandlerOutcome {
        (self.f)(agent, msg).await
    }
}
