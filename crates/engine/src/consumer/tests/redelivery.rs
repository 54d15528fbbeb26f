// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

use super::*;
use crate::consumer::DeliveryStatus;

/// Scenario:
/// 1. Given a delivered message.
/// 2. When the worker nacks it.
/// 3. Then it is redelivered at once with a higher delivery count, and an
///    ack of the redelivery consumes it.
#[tokio::test(flavor = "current_thread")]
async fn nack_triggers_immediate_redelivery() {
    let (store, coordinator) = setup();
    let mut membership = coordinator
        .join(&filter("a.>"), durable("g", 1))
        .await
        .expect("join");
    _ = publish(&store, "a.x", "1").await;

    let worker = &mut membership.workers[0];
    let first = next(worker).await;
    assert_eq!(first.delivery_count(), 1);
    assert_eq!(
        first.nack_with_reason("not yet"),
        AckOutcome::Requeued { delivery_count: 2 }
    );

    let second = next(worker).await;
    assert_eq!(second.token().sequence, 1);
    assert_eq!(second.delivery_count(), 2);
    assert_eq!(second.ack(), AckOutcome::Acked);

    let monitor = membership.monitor.clone();
    eventually(|| monitor.cursor().position == 1).await;
    assert_eq!(monitor.pending(), 0);
    assert_idle(worker).await;
}

/// Scenario:
/// 1. Given `ack_wait = 30s` and `max_deliver = 15`.
/// 2. When a worker never acknowledges a message.
/// 3. Then it is delivered exactly 15 times, each about 30s apart, then
///    expires into a dead letter and the cursor moves past it.
#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn unacknowledged_message_expires_after_max_deliver() {
    let (store, coordinator) = setup();
    let mut membership = coordinator
        .join(&filter("a.>"), durable("g", 1))
        .await
        .expect("join");
    let mut dead_letters = membership.monitor.dead_letters();
    _ = publish(&store, "a.x", "never-acked").await;

    let worker = &mut membership.workers[0];
    let mut last_seen = tokio::time::Instant::now();
    for attempt in 1..=15 {
        let delivery = next_within(worker, Duration::from_secs(60)).await;
        assert_eq!(delivery.token().sequence, 1);
        assert_eq!(delivery.delivery_count(), attempt);
        if attempt > 1 {
            assert!(last_seen.elapsed() >= Duration::from_secs(30));
        }
        last_seen = tokio::time::Instant::now();
        drop(delivery);
    }

    let dead = timeout(Duration::from_secs(60), dead_letters.recv())
        .await
        .expect("dead letter should arrive")
        .expect("dead letter channel open");
    assert_eq!(dead.message.sequence, 1);
    assert_eq!(dead.delivery_count, 15);

    assert!(
        timeout(Duration::from_secs(120), worker.recv())
            .await
            .is_err(),
        "expired message must not be delivered again"
    );
    assert_eq!(membership.monitor.cursor().position, 1);
    assert_eq!(membership.monitor.stats().expired, 1);
}

/// Scenario:
/// 1. Given a delivery whose ack deadline elapsed and which was redelivered.
/// 2. When the original worker acknowledges the first attempt late.
/// 3. Then the late ack is ignored and the redelivery stays pending.
#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn late_ack_after_redelivery_is_stale() {
    let (store, coordinator) = setup();
    let mut membership = coordinator
        .join(&filter("a.>"), durable("g", 1))
        .await
        .expect("join");
    _ = publish(&store, "a.x", "1").await;

    let worker = &mut membership.workers[0];
    let first = next(worker).await;
    let second = next_within(worker, Duration::from_secs(60)).await;
    assert_eq!(second.delivery_count(), 2);

    assert_eq!(first.ack(), AckOutcome::Stale);
    let record = membership.monitor.record(1).expect("still outstanding");
    assert_eq!(record.status, DeliveryStatus::Pending);
    assert_eq!(record.delivery_count, 2);

    assert_eq!(second.ack(), AckOutcome::Acked);
    assert!(membership.monitor.record(1).is_none());
}

/// Scenario:
/// 1. Given `max_deliver = 2`.
/// 2. When both attempts are nacked.
/// 3. Then the second nack expires the message and later acks are no-ops.
#[tokio::test(flavor = "current_thread")]
async fn nack_on_last_attempt_expires() {
    let (store, coordinator) = setup();
    let mut config = durable("g", 1);
    config.max_deliver = 2;
    let mut membership = coordinator
        .join(&filter("a.>"), config)
        .await
        .expect("join");
    let mut dead_letters = membership.monitor.dead_letters();
    _ = publish(&store, "a.x", "1").await;
    _ = publish(&store, "a.x", "2").await;

    let worker = &mut membership.workers[0];
    let first = next(worker).await;
    let other = next(worker).await;
    assert_eq!(other.token().sequence, 2);
    _ = other.ack();

    _ = first.nack();
    let retry = next(worker).await;
    let token = retry.token();
    assert_eq!(retry.nack(), AckOutcome::Expired);

    let dead = dead_letters.recv().await.expect("dead letter");
    assert_eq!(dead.delivery_count, 2);
    assert_eq!(dead.reason, "delivery rejected");

    let monitor = membership.monitor.clone();
    eventually(|| monitor.cursor().position == 2).await;
    assert_eq!(monitor.stats().expired, 1);
    assert!(monitor.record(token.sequence).is_none());
}

/// Scenario:
/// 1. Given a delivery queued for the single worker of a group.
/// 2. When the ack deadline elapses before the worker pulls it.
/// 3. Then the worker receives only the current attempt.
#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn superseded_queue_entries_are_skipped() {
    let (store, coordinator) = setup();
    let mut membership = coordinator
        .join(&filter("a.>"), durable("g", 1))
        .await
        .expect("join");
    _ = publish(&store, "a.x", "1").await;

    let monitor = membership.monitor.clone();
    eventually(|| monitor.pending() == 1).await;
    tokio::time::sleep(Duration::from_secs(32)).await;

    let worker = &mut membership.workers[0];
    let delivery = next(worker).await;
    assert_eq!(delivery.delivery_count(), 2);
    assert!(delivery.is_current());
    _ = delivery.ack();
    assert_idle(worker).await;
}
