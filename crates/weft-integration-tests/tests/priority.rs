//! Priority preemption and overload scenarios.

mod common;

use std::time::Duration;

use weft_core::{Message, MsgType, Priority, Role};

use common::{Recorder, test_fabric};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn critical_message_preempts_a_low_flood() {
    let fabric = test_fabric();

    let recorder = Recorder::new();
    let sink = fabric.register_agent("sink", Role::Agent).unwrap();
    sink.register_handler(MsgType::Request, recorder.handler()).unwrap();
    let sink = sink.start().unwrap();
    let flooder = fabric.register_agent("flooder", Role::Agent).unwrap().start().unwrap();

    // One batch reservation puts the whole flood into the Low ring at
    // once, so the Critical message lands while the backlog is deep.
    let flood = 512usize;
    let batch: Vec<Message> = (0..flood)
        .map(|i| {
            Message::builder(MsgType::Request, Priority::Low)
                .source(flooder.id())
                .target(sink.id())
                .payload(format!("low-{i}").into_bytes())
                .build()
                .unwrap()
        })
        .collect();
    flooder.send_batch(batch).await.unwrap();
    let critical = Message::builder(MsgType::Request, Priority::Critical)
        .source(flooder.id())
        .target(sink.id())
        .payload(b"critical".to_vec())
        .build()
        .unwrap();
    flooder.send(critical).await.unwrap();

    // Everything lands eventually (small test rings may drop some Low
    // traffic under back-pressure, never the Critical one).
    assert!(recorder.wait_for(1, Duration::from_secs(5)).await);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let messages = recorder.messages();
        if messages.iter().any(|m| m.payload() == b"critical") {
            let position = messages
                .iter()
                .position(|m| m.payload() == b"critical")
                .expect("critical observed");
            // The scheduler visits Critical before finishing the Low
            // backlog: the critical message must not arrive last.
            assert!(
                position < flood / 2,
                "critical delivered at position {position} of {}",
                messages.len()
            );
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "critical message never delivered"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    fabric.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sustained_low_overload_drops_low_not_high() {
    let fabric = test_fabric();

    let low_recorder = Recorder::new();
    let high_recorder = Recorder::new();
    let sink = fabric.register_agent("sink", Role::Agent).unwrap();
    sink.register_handler(MsgType::Request, low_recorder.handler()).unwrap();
    sink.register_handler(MsgType::Task, high_recorder.handler()).unwrap();
    let sink = sink.start().unwrap();
    let producer = fabric.register_agent("producer", Role::Agent).unwrap().start().unwrap();

    // Saturate Bulk-adjacent Low traffic far past the test ring capacity
    // while trickling High traffic.
    for i in 0..5000usize {
        let low = Message::builder(MsgType::Request, Priority::Low)
            .source(producer.id())
            .target(sink.id())
            .payload(i.to_le_bytes().to_vec())
            .build()
            .unwrap();
        producer.send(low).await.unwrap();
        if i % 100 == 0 {
            let high = Message::builder(MsgType::Task, Priority::High)
                .source(producer.id())
                .target(sink.id())
                .payload(i.to_le_bytes().to_vec())
                .build()
                .unwrap();
            producer.send(high).await.unwrap();
        }
    }

    assert!(
        high_recorder.wait_for(50, Duration::from_secs(10)).await,
        "high-priority traffic flows under low-class overload"
    );
    let snapshot = fabric.metrics_snapshot();
    assert_eq!(
        snapshot.classes[Priority::High.index()].dropped, 0,
        "no high-priority drops"
    );

    fabric.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn emergency_ring_never_full_under_lower_class_pressure() {
    let fabric = test_fabric();

    let sink = fabric.register_agent("sink", Role::Agent).unwrap().start().unwrap();
    let admin = fabric.register_agent("admin", Role::Admin).unwrap().start().unwrap();

    // Fill lower classes well past capacity.
    for i in 0..3000usize {
        let msg = Message::builder(MsgType::Request, Priority::Bulk)
            .source(admin.id())
            .target(sink.id())
            .payload(i.to_le_bytes().to_vec())
            .build()
            .unwrap();
        admin.send(msg).await.unwrap();
    }

    // The Emergency class still accepts immediately.
    for _ in 0..16 {
        admin
            .broadcast(Priority::Emergency, b"alarm".to_vec())
            .await
            .expect("emergency enqueue never reports Full here");
    }
    assert!(!fabric.is_fatal());
    let snapshot = fabric.metrics_snapshot();
    assert_eq!(snapshot.classes[Priority::Emergency.index()].dropped, 0);

    fabric.shutdown().await;
}
