//! Direct and RPC round-trip scenarios.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use weft_core::{AgentId, Priority, Role};
use weft_runtime::{FnHandler, RuntimeError};

use common::test_fabric;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ping_pong_round_trip() {
    let fabric = test_fabric();

    let seen_correlation = Arc::new(AtomicU64::new(0));
    let responder = fabric.register_agent("b", Role::Agent).unwrap();
    {
        let seen = Arc::clone(&seen_correlation);
        responder
            .register_handler(
                weft_core::MsgType::Request,
                FnHandler::new(move |_agent, msg| {
                    let seen = Arc::clone(&seen);
                    async move {
                        assert_eq!(msg.payload(), b"ping");
                        seen.store(msg.header().correlation_id, Ordering::SeqCst);
                        Ok(Some(b"pong".to_vec()))
                    }
                }),
            )
            .unwrap();
    }
    let responder = responder.start().unwrap();
    let caller = fabric.register_agent("a", Role::Agent).unwrap().start().unwrap();

    let reply = caller
        .call(
            responder.id(),
            b"ping".to_vec(),
            Priority::High,
            Duration::from_millis(50),
        )
        .await
        .expect("rpc resolves within the deadline");

    assert_eq!(reply.payload(), b"pong");
    assert_eq!(reply.msg_type(), weft_core::MsgType::Response);
    assert_eq!(reply.priority(), Priority::High);
    // Both legs carry the same correlation id.
    assert_eq!(
        reply.header().correlation_id,
        seen_correlation.load(Ordering::SeqCst)
    );
    assert_eq!(reply.source(), responder.id());

    fabric.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn rpc_timeout_when_handler_never_replies() {
    let fabric = test_fabric();
    let silent = fabric.register_agent("silent", Role::Agent).unwrap().start().unwrap();
    let caller = fabric.register_agent("caller", Role::Agent).unwrap().start().unwrap();

    let err = caller
        .call(
            silent.id(),
            b"anyone there".to_vec(),
            Priority::Medium,
            Duration::from_millis(50),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::RpcTimeout { timeout_ms: 50, .. }));
    assert_eq!(fabric.metrics_snapshot().rpc_timeouts, 1);

    fabric.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn rpc_to_unknown_target_fails_no_route() {
    let fabric = test_fabric();
    let caller = fabric.register_agent("caller", Role::Agent).unwrap().start().unwrap();

    let err = caller
        .call(
            AgentId::new(4242),
            b"void".to_vec(),
            Priority::Medium,
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
    // The router reports unroutable requests to the caller's waker; this
    // must not take anywhere near the full deadline.
    assert!(matches!(err, RuntimeError::Route(_)));
    assert!(fabric.metrics_snapshot().no_route >= 1);

    fabric.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn handler_failure_is_isolated() {
    let fabric = test_fabric();

    let flaky = fabric.register_agent("flaky", Role::Agent).unwrap();
    let calls = Arc::new(AtomicU64::new(0));
    {
        let calls = Arc::clone(&calls);
        flaky
            .register_handler(
                weft_core::MsgType::Request,
                FnHandler::new(move |_agent, _msg| {
                    let calls = Arc::clone(&calls);
                    async move {
                        if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                            Err(weft_runtime::HandlerFailure::new("first call explodes"))
                        } else {
                            Ok(Some(b"recovered".to_vec()))
                        }
                    }
                }),
            )
            .unwrap();
    }
    let flaky = flaky.start().unwrap();
    let caller = fabric.register_agent("caller", Role::Agent).unwrap().start().unwrap();

    // First call fails inside the handler: no reply, the caller times out.
    let first = caller
        .call(flaky.id(), b"x".to_vec(), Priority::Medium, Duration::from_millis(50))
        .await;
    assert!(first.is_err());

    // The agent stayed active and serves the next request.
    let second = caller
        .call(flaky.id(), b"x".to_vec(), Priority::Medium, Duration::from_millis(500))
        .await
        .expect("agent survived the handler failure");
    assert_eq!(second.payload(), b"recovered");

    fabric.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fifo_order_within_source_and_class() {
    let fabric = test_fabric();

    let recorder = common::Recorder::new();
    let sink = fabric.register_agent("sink", Role::Agent).unwrap();
    sink.register_handler(weft_core::MsgType::Request, recorder.handler())
        .unwrap();
    let sink = sink.start().unwrap();
    let sender = fabric.register_agent("sender", Role::Agent).unwrap().start().unwrap();

    let total = 200u64;
    for i in 0..total {
        let msg = weft_core::Message::builder(weft_core::MsgType::Request, Priority::Medium)
            .source(sender.id())
            .target(sink.id())
            .payload(i.to_le_bytes().to_vec())
            .build()
            .unwrap();
        sender.send(msg).await.unwrap();
    }

    assert!(
        recorder.wait_for(total as usize, Duration::from_secs(5)).await,
        "all messages delivered"
    );
    let order: Vec<u64> = recorder
        .messages()
        .iter()
        .map(|m| u64::from_le_bytes(m.payload().try_into().expect("8-byte payload")))
        .collect();
    let expected: Vec<u64> = (0..total).collect();
    assert_eq!(order, expected, "delivery order matches enqueue order");

    fabric.shutdown().await;
}
