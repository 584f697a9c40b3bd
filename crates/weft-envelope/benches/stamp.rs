//! Stamp and verify throughput benchmarks.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use std::sync::Arc;

use weft_core::{AgentId, Message, MonotonicClock, MsgType, Priority, Role};
use weft_envelope::AuthEnvelope;
use weft_identity::{IdentityStore, MasterKey};

fn fixture() -> (AuthEnvelope, AgentId, AgentId) {
    let store = Arc::new(IdentityStore::new(MasterKey::generate()));
    let (a, _) = store.register("bench-a", Role::Agent).expect("register");
    let (b, _) = store.register("bench-b", Role::Agent).expect("register");
    (AuthEnvelope::new(store, MonotonicClock::new()), a, b)
}

fn message(source: AgentId, target: AgentId, payload_len: usize) -> Message {
    Message::builder(MsgType::Request, Priority::High)
        .source(source)
        .target(target)
        .payload(vec![0x5A; payload_len])
        .build()
        .expect("valid message")
}

fn bench_stamp(c: &mut Criterion) {
    let (envelope, a, b) = fixture();
    for payload_len in [64usize, 1024, 16 * 1024] {
        c.bench_function(&format!("stamp_{payload_len}b"), |bench| {
            bench.iter_batched(
                || message(a, b, payload_len),
                |mut msg| envelope.stamp(black_box(&mut msg), a).expect("stamp"),
                criterion::BatchSize::SmallInput,
            );
        });
    }
}

fn bench_verify(c: &mut Criterion) {
    let (envelope, a, b) = fixture();
    for payload_len in [64usize, 1024, 16 * 1024] {
        let mut msg = message(a, b, payload_len);
        envelope.stamp(&mut msg, a).expect("stamp");
        c.bench_function(&format!("verify_{payload_len}b"), |bench| {
            bench.iter(|| envelope.verify(black_box(&msg)).expect("verify"));
        });
    }
}

criterion_group!(benches, bench_stamp, bench_verify);
criterion_main!(benches);
