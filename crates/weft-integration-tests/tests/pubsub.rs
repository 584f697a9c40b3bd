//! Pub/sub topic isolation scenarios.

mod common;

use std::time::Duration;

use weft_core::{Priority, Role};

use common::{Recorder, test_fabric};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn subscribers_see_only_their_topic() {
    let fabric = test_fabric();

    let s1_recorder = Recorder::new();
    let s1 = fabric.register_agent("s1", Role::Agent).unwrap();
    s1.register_handler(weft_core::MsgType::Event, s1_recorder.handler())
        .unwrap();
    let s1 = s1.start().unwrap();
    s1.subscribe("metrics.cpu");

    let s2_recorder = Recorder::new();
    let s2 = fabric.register_agent("s2", Role::Agent).unwrap();
    s2.register_handler(weft_core::MsgType::Event, s2_recorder.handler())
        .unwrap();
    let s2 = s2.start().unwrap();
    s2.subscribe("metrics.cpu");

    let publisher = fabric.register_agent("p", Role::Agent).unwrap().start().unwrap();

    let per_topic = 1000usize;
    for i in 0..per_topic {
        publisher
            .publish("metrics.cpu", i.to_le_bytes().to_vec(), Priority::Low)
            .await
            .unwrap();
        publisher
            .publish("metrics.mem", i.to_le_bytes().to_vec(), Priority::Low)
            .await
            .unwrap();
    }

    assert!(s1_recorder.wait_for(per_topic, Duration::from_secs(10)).await);
    assert!(s2_recorder.wait_for(per_topic, Duration::from_secs(10)).await);
    tokio::time::sleep(Duration::from_millis(100)).await;

    for recorder in [&s1_recorder, &s2_recorder] {
        let messages = recorder.messages();
        assert_eq!(messages.len(), per_topic, "exactly the cpu events, no more");
        for msg in &messages {
            assert_eq!(msg.topic().expect("topic parses"), "metrics.cpu");
        }
    }

    fabric.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unsubscribe_stops_delivery() {
    let fabric = test_fabric();

    let recorder = Recorder::new();
    let subscriber = fabric.register_agent("s", Role::Agent).unwrap();
    subscriber
        .register_handler(weft_core::MsgType::Event, recorder.handler())
        .unwrap();
    let subscriber = subscriber.start().unwrap();
    subscriber.subscribe("ticks");

    let publisher = fabric.register_agent("p", Role::Agent).unwrap().start().unwrap();
    publisher.publish("ticks", b"1".to_vec(), Priority::Low).await.unwrap();
    assert!(recorder.wait_for(1, Duration::from_secs(2)).await);

    subscriber.unsubscribe("ticks");
    publisher.publish("ticks", b"2".to_vec(), Priority::Low).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(recorder.len(), 1, "no delivery after unsubscribe");

    fabric.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn publisher_without_subscribers_is_not_an_error() {
    let fabric = test_fabric();
    let publisher = fabric.register_agent("p", Role::Agent).unwrap().start().unwrap();
    publisher
        .publish("void.topic", b"anyone".to_vec(), Priority::Low)
        .await
        .expect("publishing into the void is fine");
    fabric.shutdown().await;
}
