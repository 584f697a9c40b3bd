//! Ring throughput benchmarks.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use std::sync::Arc;
use std::thread;

use weft_fabric::Ring;

fn bench_uncontended(c: &mut Criterion) {
    let ring: Ring<u64> = Ring::with_capacity(1 << 16).expect("capacity is a power of two");
    c.bench_function("ring_enqueue_dequeue_uncontended", |b| {
        b.iter(|| {
            ring.try_enqueue(black_box(42)).ok();
            black_box(ring.try_dequeue());
        });
    });
}

fn bench_batch(c: &mut Criterion) {
    let ring: Ring<u64> = Ring::with_capacity(1 << 16).expect("capacity is a power of two");
    c.bench_function("ring_enqueue_batch_64", |b| {
        b.iter(|| {
            ring.try_enqueue_batch(black_box((0..64).collect())).ok();
            while ring.try_dequeue().is_some() {}
        });
    });
}

fn bench_contended(c: &mut Criterion) {
    c.bench_function("ring_mpmc_2p2c_10k", |b| {
        b.iter(|| {
            let ring: Arc<Ring<u64>> =
                Arc::new(Ring::with_capacity(1 << 10).expect("capacity is a power of two"));
            let mut handles = Vec::new();
            for _ in 0..2 {
                let ring = Arc::clone(&ring);
                handles.push(thread::spawn(move || {
                    for i in 0..10_000u64 {
                        let mut value = i;
                        loop {
                            match ring.try_enqueue(value) {
                                Ok(()) => break,
                                Err(e) => {
                                    value = e.into_inner();
                                    thread::yield_now();
                                }
                            }
                        }
                    }
                }));
            }
            for _ in 0..2 {
                let ring = Arc::clone(&ring);
                handles.push(thread::spawn(move || {
                    let mut taken = 0u64;
                    while taken < 10_000 {
                        if ring.try_dequeue().is_some() {
                            taken += 1;
                        } else {
                            thread::yield_now();
                        }
                    }
                }));
            }
            for handle in handles {
                handle.join().expect("bench thread panicked");
            }
        });
    });
}

criterion_group!(benches, bench_uncontended, bench_batch, bench_contended);
criterion_main!(benches);
