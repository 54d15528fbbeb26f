// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Criterion benchmarks for consumer group delivery against a bare flume MPMC queue.

#![allow(missing_docs)]

use std::hint::black_box;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use ackstream_config::{ConnectionConfig, ConsumerConfig, GroupName, PublisherConfig, StreamConfig};
use ackstream_engine::{
    Ack, Connection, Envelope, FnHandler, InMemoryStore, Subscriber, filter, subject,
};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use tokio::runtime::Runtime;
use tokio::sync::Notify;

const MSG_COUNT: u64 = 2_000;
const MSG_SIZES: [usize; 2] = [32, 4096];
const WORKER_COUNTS: [usize; 3] = [1, 4, 8];

#[derive(Clone, Copy)]
struct BenchCase {
    msg_size: usize,
    workers: usize,
}

async fn run_engine_case(case: BenchCase) {
    let store = Arc::new(InMemoryStore::new("bench", StreamConfig::default()));
    let connection = Connection::open(&ConnectionConfig::default(), store)
        .await
        .expect("benchmark connection failed");

    let handled = Arc::new(AtomicU64::new(0));
    let done = Arc::new(Notify::new());
    let subscriber = Subscriber::new(
        &connection,
        ConsumerConfig::durable(
            GroupName::parse("bench").expect("valid group"),
            case.workers,
        ),
    );
    let (counter, finished) = (handled.clone(), done.clone());
    _ = subscriber
        .subscribe(
            &filter("bench.>").expect("valid filter"),
            Arc::new(FnHandler::new(move |envelope: Envelope| {
                let counter = counter.clone();
                let finished = finished.clone();
                async move {
                    _ = black_box(envelope.payload());
                    if counter.fetch_add(1, Ordering::AcqRel) + 1 == MSG_COUNT {
                        finished.notify_one();
                    }
                    Ok(Ack)
                }
            })),
        )
        .await
        .expect("benchmark subscription failed");

    let publisher = connection
        .publisher(PublisherConfig::default())
        .expect("benchmark publisher failed");
    let target = subject("bench.load").expect("valid subject");
    let payload: Arc<[u8]> = vec![42u8; case.msg_size].into();
    let mut confirmations = Vec::with_capacity(MSG_COUNT as usize);
    for i in 0..MSG_COUNT {
        confirmations.push(
            publisher
                .publish_async(&target, Envelope::new(i.to_string(), payload.clone()))
                .await
                .expect("benchmark publish failed"),
        );
    }
    for confirmation in confirmations {
        _ = confirmation.await.expect("benchmark publish not confirmed");
    }

    done.notified().await;
    assert_eq!(handled.load(Ordering::Acquire), MSG_COUNT);
    subscriber.close().await;
    connection.close().await;
}

async fn run_flume_case(case: BenchCase) {
    let (tx, rx) = flume::bounded::<Arc<[u8]>>(2048);

    let mut handles = Vec::new();
    for _ in 0..case.workers {
        let rx = rx.clone();
        handles.push(tokio::spawn(async move {
            let mut count = 0u64;
            while let Ok(msg) = rx.recv_async().await {
                _ = black_box(&msg);
                count += 1;
            }
            count
        }));
    }
    drop(rx);

    let payload: Arc<[u8]> = vec![42u8; case.msg_size].into();
    for _ in 0..MSG_COUNT {
        tx.send_async(payload.clone())
            .await
            .expect("flume send failed");
    }
    drop(tx);

    let mut total = 0u64;
    for handle in handles {
        total += handle.await.expect("worker task panicked");
    }
    assert_eq!(total, MSG_COUNT);
}

fn bench_balanced_delivery(c: &mut Criterion) {
    for &msg_size in &MSG_SIZES {
        let mut group = c.benchmark_group(format!("balanced_delivery/{msg_size}B"));
        _ = group.throughput(Throughput::Elements(MSG_COUNT));
        _ = group.sample_size(20);

        for &workers in &WORKER_COUNTS {
            let case = BenchCase { msg_size, workers };

            _ = group.bench_with_input(BenchmarkId::new("engine", workers), &case, |b, case| {
                let rt = Runtime::new().expect("tokio runtime creation failed");
                b.to_async(&rt).iter(|| run_engine_case(*case));
            });

            _ = group.bench_with_input(BenchmarkId::new("flume", workers), &case, |b, case| {
                let rt = Runtime::new().expect("tokio runtime creation failed");
                b.to_async(&rt).iter(|| run_flume_case(*case));
            });
        }

        group.finish();
    }
}

criterion_group!(benches, bench_balanced_delivery);
criterion_main!(benches);
