// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

use super::*;
use crate::error::Error;
use std::collections::BTreeSet;

/// Scenario:
/// 1. Given two durable groups on the same filter.
/// 2. When four messages are published.
/// 3. Then each group receives a full copy.
#[tokio::test(flavor = "current_thread")]
async fn independent_groups_each_receive_every_message() {
    let (store, coordinator) = setup();
    let mut first = coordinator
        .join(&filter("example_topic.>"), durable("g1", 1))
        .await
        .expect("first group should join");
    let mut second = coordinator
        .join(&filter("example_topic.>"), durable("g2", 1))
        .await
        .expect("second group should join");

    for raw in [
        "example_topic.a",
        "example_topic.b",
        "example_topic.a.test",
        "example_topic.b.test",
    ] {
        _ = publish(&store, raw, raw).await;
    }

    for membership in [&mut first, &mut second] {
        let worker = &mut membership.workers[0];
        for expected in 1..=4 {
            let delivery = next(worker).await;
            assert_eq!(delivery.token().sequence, expected);
            assert_eq!(delivery.ack(), AckOutcome::Acked);
        }
        assert_idle(worker).await;
    }
    assert_eq!(coordinator.group_count(), 2);
}

/// Scenario:
/// 1. Given one group with two competing workers.
/// 2. When ten messages are published and every delivery is acknowledged.
/// 3. Then each message is delivered to exactly one worker.
#[tokio::test(flavor = "current_thread")]
async fn competing_workers_share_one_queue() {
    let (store, coordinator) = setup();
    let membership = coordinator
        .join(&filter("jobs.>"), durable("workers", 2))
        .await
        .expect("group should join");
    let mut workers = membership.workers;
    let mut right = workers.pop().expect("two workers");
    let mut left = workers.pop().expect("two workers");

    for i in 0..10 {
        _ = publish(&store, "jobs.run", &format!("job-{i}")).await;
    }

    let mut seen = BTreeSet::new();
    let mut per_worker = [0usize; 2];
    while seen.len() < 10 {
        let (index, delivery) = tokio::select! {
            delivery = left.recv() => (0, delivery),
            delivery = right.recv() => (1, delivery),
        };
        let delivery = delivery.expect("workers should stay open");
        assert!(
            seen.insert(delivery.token().sequence),
            "sequence delivered twice"
        );
        per_worker[index] += 1;
        _ = delivery.ack();
    }
    assert_eq!(per_worker[0] + per_worker[1], 10);
    assert_idle(&mut left).await;
    assert_idle(&mut right).await;
}

#[tokio::test(flavor = "current_thread")]
async fn single_worker_sees_partition_order() {
    let (store, coordinator) = setup();
    let mut membership = coordinator
        .join(&filter("example_topic.a"), durable("ordered", 1))
        .await
        .expect("group should join");
    for i in 0..6 {
        let raw = if i % 2 == 0 { "example_topic.a" } else { "example_topic.b" };
        _ = publish(&store, raw, &format!("m-{i}")).await;
    }

    let worker = &mut membership.workers[0];
    let mut ids = Vec::new();
    for _ in 0..3 {
        let delivery = next(worker).await;
        ids.push(delivery.envelope().id().to_owned());
        _ = delivery.ack();
    }
    assert_eq!(ids, vec!["m-0", "m-2", "m-4"]);
}

#[tokio::test(flavor = "current_thread")]
async fn wildcard_filter_selects_matching_subjects() {
    let (store, coordinator) = setup();
    let mut membership = coordinator
        .join(&filter("example_topic.*.test"), ConsumerConfig::default())
        .await
        .expect("group should join");
    for raw in [
        "example_topic.a",
        "example_topic.a.test",
        "example_topic.b",
        "example_topic.b.test",
    ] {
        _ = publish(&store, raw, raw).await;
    }

    let worker = &mut membership.workers[0];
    let a = next(worker).await;
    let b = next(worker).await;
    assert_eq!(a.envelope().id(), "example_topic.a.test");
    assert_eq!(b.envelope().id(), "example_topic.b.test");
    assert_eq!(a.envelope().subject(), Some(&subject("example_topic.a.test")));
    assert_idle(worker).await;
}

/// Scenario:
/// 1. Given a running durable group.
/// 2. When the same group joins again with the same settings, then with a
///    different `max_deliver`.
/// 3. Then the first join attaches to the running group and the second fails.
#[tokio::test(flavor = "current_thread")]
async fn join_is_idempotent_per_group_and_filter() {
    let (_store, coordinator) = setup();
    let first = coordinator
        .join(&filter("a.>"), durable("g", 1))
        .await
        .expect("first join");
    let second = coordinator
        .join(&filter("a.>"), durable("g", 3))
        .await
        .expect("second join with another worker count");
    assert_eq!(coordinator.group_count(), 1);
    assert_eq!(first.group, second.group);
    assert_eq!(second.workers.len(), 3);

    let mut other = durable("g", 1);
    other.max_deliver = 3;
    let result = coordinator.join(&filter("a.>"), other).await;
    assert!(matches!(result, Err(Error::InvalidConfig { .. })));

    // Same name on another filter is another group.
    _ = coordinator
        .join(&filter("b.>"), durable("g", 1))
        .await
        .expect("join on another filter");
    assert_eq!(coordinator.group_count(), 2);
}

#[tokio::test(flavor = "current_thread")]
async fn multiple_workers_without_durable_name_are_rejected() {
    let (_store, coordinator) = setup();
    let config = ConsumerConfig {
        worker_count: 4,
        ..ConsumerConfig::default()
    };
    let result = coordinator.join(&filter("a.>"), config).await;
    match result {
        Err(Error::InvalidConfig { reason, .. }) => {
            assert!(reason.contains("requires a durable group"));
        }
        _ => panic!("expected InvalidConfig"),
    }
    assert_eq!(coordinator.group_count(), 0);
}

/// Scenario:
/// 1. Given two ephemeral subscriptions on the same filter.
/// 2. When the last worker of one leaves.
/// 3. Then that group is gone, the other keeps running, and its cursor is
///    removed from the store.
#[tokio::test(flavor = "current_thread")]
async fn ephemeral_group_is_reclaimed_by_its_last_worker() {
    let (store, coordinator) = setup();
    let first = coordinator
        .join(&filter("a.>"), ConsumerConfig::default())
        .await
        .expect("ephemeral join");
    let second = coordinator
        .join(&filter("a.>"), ConsumerConfig::default())
        .await
        .expect("ephemeral join");
    assert_ne!(first.group, second.group);
    assert_eq!(coordinator.group_count(), 2);

    let key = crate::store::CursorKey {
        group: first.group.clone(),
        filter: filter("a.>"),
    };
    // Left behind by an earlier group that used the same generated name.
    store
        .save_cursor(&crate::store::DurableCursor {
            group: first.group.clone(),
            filter: filter("a.>"),
            position: 7,
        })
        .await
        .expect("save");

    _ = publish(&store, "a.x", "1").await;
    let mut workers = first.workers;
    let delivery = next(&mut workers[0]).await;
    _ = delivery.ack();
    let monitor = first.monitor.clone();
    eventually(|| monitor.cursor().position == 1).await;

    coordinator.leave(workers[0].id()).await;
    assert_eq!(coordinator.group_count(), 1);
    assert!(first.monitor.is_closed());
    assert!(workers[0].recv().await.is_none());
    assert_eq!(store.load_cursor(&key).await.expect("load"), None);
}

#[tokio::test(flavor = "current_thread")]
async fn closed_coordinator_rejects_joins() {
    let store = Arc::new(InMemoryStore::new("t", StreamConfig::default()));
    let shutdown = CancellationToken::new();
    let coordinator = ConsumerGroupCoordinator::new("memory://t", store, shutdown.clone());
    let mut membership = coordinator
        .join(&filter("a"), durable("g", 1))
        .await
        .expect("join");
    coordinator.close().await;
    shutdown.cancel();
    assert!(membership.workers[0].recv().await.is_none());
    assert!(matches!(
        coordinator.join(&filter("a"), durable("g", 1)).await,
        Err(Error::ConnectionClosed { .. })
    ));
}
