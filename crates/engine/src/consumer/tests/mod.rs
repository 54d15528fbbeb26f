// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

use super::{AckOutcome, ConsumerGroupCoordinator, Delivery, WorkerQueue};
use crate::envelope::Envelope;
use crate::store::{AppendOptions, InMemoryStore, StreamStore};
use ackstream_config::{ConsumerConfig, GroupName, StreamConfig, Subject, SubjectFilter};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

pub(super) fn subject(raw: &str) -> Subject {
    Subject::parse(raw).expect("subject should be valid")
}

pub(super) fn filter(raw: &str) -> SubjectFilter {
    SubjectFilter::parse(raw).expect("filter should be valid")
}

pub(super) fn group(raw: &str) -> GroupName {
    GroupName::parse(raw).expect("group name should be valid")
}

pub(super) fn durable(name: &str, worker_count: usize) -> ConsumerConfig {
    ConsumerConfig::durable(group(name), worker_count)
}

pub(super) fn setup() -> (Arc<InMemoryStore>, ConsumerGroupCoordinator) {
    let store = Arc::new(InMemoryStore::new("test", StreamConfig::default()));
    let coordinator =
        ConsumerGroupCoordinator::new("memory://test", store.clone(), CancellationToken::new());
    (store, coordinator)
}

pub(super) async fn publish(store: &InMemoryStore, raw_subject: &str, id: &str) -> u64 {
    store
        .append(
            &subject(raw_subject),
            Envelope::new(id, id.as_bytes().to_vec()),
            AppendOptions::default(),
        )
        .await
        .expect("append should succeed")
        .sequence
}

pub(super) async fn next_within(worker: &mut WorkerQueue, wait: Duration) -> Delivery {
    timeout(wait, worker.recv())
        .await
        .expect("a delivery should arrive in time")
        .expect("worker should still be a member")
}

pub(super) async fn next(worker: &mut WorkerQueue) -> Delivery {
    next_within(worker, Duration::from_secs(5)).await
}

pub(super) async fn assert_idle(worker: &mut WorkerQueue) {
    assert!(
        timeout(Duration::from_millis(100), worker.recv())
            .await
            .is_err(),
        "no delivery was expected"
    );
}

pub(super) async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

mod groups;
mod redelivery;
