//! Shared helpers for the end-to-end scenarios.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use weft_config::WeftConfig;
use weft_core::Message;
use weft_identity::MasterKey;
use weft_runtime::{Fabric, FnHandler};

/// A fabric with test-sized rings and short grace bounds.
pub fn test_fabric() -> Fabric {
    Fabric::start(WeftConfig::for_tests(), MasterKey::generate()).expect("fabric starts")
}

/// Thread-safe recorder of delivered messages, shared with handlers.
#[derive(Clone, Default)]
pub struct Recorder {
    inner: Arc<Mutex<Vec<Arc<Message>>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handler that records every message and sends no reply.
    pub fn handler(&self) -> impl weft_runtime::MessageHandler + use<> {
        let inner = Arc::clone(&self.inner);
        FnHandler::new(move |_agent, msg| {
            let inner = Arc::clone(&inner);
            async move {
                inner.lock().expect("recorder lock").push(msg);
                Ok(None)
            }
        })
    }

    pub fn messages(&self) -> Vec<Arc<Message>> {
        self.inner.lock().expect("recorder lock").clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("recorder lock").len()
    }

    /// Poll until the recorder holds at least `n` messages or the deadline
    /// passes; returns whether the count was reached.
    pub async fn wait_for(&self, n: usize, deadline: Duration) -> bool {
        let start = tokio::time::Instant::now();
        while start.elapsed() < deadline {
            if self.len() >= n {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.len() >= n
    }
}
