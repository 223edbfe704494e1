//! Frame Broadcast Benchmarks
//!
//! Publish cost must not grow with the number of waiting viewers.

use std::sync::Arc;

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use lamco_mjpeg_server::video::FrameBroadcastBuffer;

/// Publish with `waiters` async viewers parked in `wait_next`
fn bench_publish_with_waiters(c: &mut Criterion) {
    let mut group = c.benchmark_group("broadcast_publish");
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap();
    let frame = Bytes::from(vec![0xABu8; 200 * 1024]);

    for waiters in [0usize, 16, 256] {
        let buffer = Arc::new(FrameBroadcastBuffer::new());

        let tasks: Vec<_> = (0..waiters)
            .map(|_| {
                let buffer = Arc::clone(&buffer);
                runtime.spawn(async move {
                    let mut last_seen = 0;
                    loop {
                        last_seen = buffer.wait_next(last_seen).await.generation();
                    }
                })
            })
            .collect();

        group.bench_function(BenchmarkId::new("waiters", waiters), |b| {
            b.iter(|| black_box(buffer.publish(frame.clone())))
        });

        for task in tasks {
            task.abort();
        }
    }

    group.finish();
}

fn bench_wait_next_ready(c: &mut Criterion) {
    let buffer = FrameBroadcastBuffer::new();
    buffer.publish(Bytes::from_static(b"frame"));

    c.bench_function("broadcast_wait_next_ready", |b| {
        b.iter(|| black_box(buffer.wait_next_blocking(black_box(0))))
    });
}

fn bench_snapshot(c: &mut Criterion) {
    let buffer = FrameBroadcastBuffer::new();
    buffer.publish(Bytes::from_static(b"frame"));

    c.bench_function("broadcast_snapshot", |b| b.iter(|| black_box(buffer.snapshot())));
}

criterion_group!(benches, bench_publish_with_waiters, bench_wait_next_ready, bench_snapshot);
criterion_main!(benches);
