// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Runtime of one consumer group.
//!
//! A group owns one shared queue whose receiver is cloned into every worker,
//! so each queued delivery is consumed by exactly one worker. Two tasks drive
//! it:
//!
//! - the fetch task hands out redeliveries, then reads new matching messages
//!   while fewer than `max_ack_pending` are outstanding, then advances the
//!   cursor to the tracker's low-water mark;
//! - the sweep task periodically turns elapsed ack deadlines into nacks.
//!
//! Both wake the fetch task through one `Notify`. Acks and nacks wake it too.
//!
//! Without explicit acks nothing is tracked; the cursor then follows the
//! last message a worker actually took off the queue.

use super::delivery::DeliveryAckHandler;
use super::tracker::{AckOutcome, DeadLetter, DeliveryToken, DeliveryTracker};
use crate::error::Error;
use crate::store::{DurableCursor, StoredMessage, StreamStore};
use ackstream_config::{AckPolicy, ConsumerConfig, GroupName, SubjectFilter};
use arc_swap::ArcSwap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, broadcast};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

const STORE_RETRY_BACKOFF: Duration = Duration::from_millis(500);
const DEAD_LETTER_CAPACITY: usize = 1024;

pub(super) struct QueuedDelivery {
    pub(super) message: StoredMessage,
    pub(super) token: DeliveryToken,
}

pub(crate) struct GroupShared {
    pub(super) group: GroupName,
    pub(super) filter: SubjectFilter,
    pub(super) config: ConsumerConfig,
    pub(super) tracker: DeliveryTracker,
    pub(super) wake: Notify,
    pub(super) cursor: ArcSwap<DurableCursor>,
    pub(super) dead_letters: broadcast::Sender<DeadLetter>,
    pub(super) queue_tx: flume::Sender<QueuedDelivery>,
    // Cloned by all workers of the group; each delivery is consumed once.
    pub(super) queue_rx: flume::Receiver<QueuedDelivery>,
    // Highest sequence taken off the queue under `AckPolicy::None`.
    handed_off: AtomicU64,
    pub(super) shutdown: CancellationToken,
}

impl GroupShared {
    pub(super) fn new(
        group: GroupName,
        filter: SubjectFilter,
        config: ConsumerConfig,
        position: u64,
        shutdown: CancellationToken,
    ) -> Self {
        let (queue_tx, queue_rx) = flume::unbounded();
        let (dead_letters, _) = broadcast::channel(DEAD_LETTER_CAPACITY);
        Self {
            tracker: DeliveryTracker::new(config.ack_wait(), config.max_deliver),
            cursor: ArcSwap::from_pointee(DurableCursor {
                group: group.clone(),
                filter: filter.clone(),
                position,
            }),
            group,
            filter,
            config,
            wake: Notify::new(),
            dead_letters,
            queue_tx,
            queue_rx,
            handed_off: AtomicU64::new(position),
            shutdown,
        }
    }

    pub(super) fn is_explicit(&self) -> bool {
        self.config.ack_policy == AckPolicy::Explicit
    }

    fn enqueue(&self, message: StoredMessage, token: DeliveryToken) {
        tracing::debug!(
            group = %self.group,
            filter = %self.filter,
            sequence = token.sequence,
            delivery_count = token.delivery_count,
            "queued delivery"
        );
        let _ignore_closed = self.queue_tx.send(QueuedDelivery { message, token });
    }

    /// Records that a worker took `sequence` under `AckPolicy::None`, which
    /// disposes of it, and lets the group refill the queue.
    pub(super) fn hand_off(&self, sequence: u64) {
        _ = self.handed_off.fetch_max(sequence, Ordering::AcqRel);
        self.wake.notify_one();
    }

    /// Highest position the cursor may reach once everything up to
    /// `dispatched_to` was queued.
    fn disposed_to(&self, dispatched_to: u64) -> u64 {
        if self.is_explicit() {
            self.tracker.low_water_mark(dispatched_to)
        } else if self.queue_rx.is_empty() {
            // Only the fetch task enqueues, so an empty queue means every
            // queued message was taken.
            dispatched_to
        } else {
            self.handed_off.load(Ordering::Acquire).min(dispatched_to)
        }
    }

    /// Number of free delivery slots under `max_ack_pending`.
    fn free_slots(&self) -> usize {
        let in_use = if self.is_explicit() {
            self.tracker.outstanding()
        } else {
            self.queue_rx.len()
        };
        self.config.max_ack_pending.saturating_sub(in_use)
    }

    fn publish_dead_letters(&self) {
        for dead in self.tracker.take_dead_letters() {
            tracing::warn!(
                group = %self.group,
                filter = %self.filter,
                sequence = dead.message.sequence,
                delivery_count = dead.delivery_count,
                reason = %dead.reason,
                "message expired after reaching max_deliver"
            );
            let _ignore_no_receivers = self.dead_letters.send(dead);
        }
    }

    fn wake_on(&self, outcome: AckOutcome) -> AckOutcome {
        if matches!(
            outcome,
            AckOutcome::Acked | AckOutcome::Requeued { .. } | AckOutcome::Expired
        ) {
            self.wake.notify_one();
        }
        outcome
    }
}

impl DeliveryAckHandler for GroupShared {
    fn ack(&self, token: DeliveryToken) -> AckOutcome {
        let outcome = self.tracker.ack(token);
        if outcome != AckOutcome::Acked {
            tracing::debug!(
                group = %self.group,
                sequence = token.sequence,
                delivery_count = token.delivery_count,
                ?outcome,
                "ignored ack"
            );
        }
        self.wake_on(outcome)
    }

    fn nack(&self, token: DeliveryToken, reason: &str) -> AckOutcome {
        let outcome = self.tracker.nack(token, reason);
        tracing::debug!(
            group = %self.group,
            sequence = token.sequence,
            delivery_count = token.delivery_count,
            reason,
            ?outcome,
            "nack"
        );
        self.wake_on(outcome)
    }

    fn is_current(&self, token: DeliveryToken) -> bool {
        self.tracker.is_current(token)
    }
}

/// Fetch task state.
pub(super) struct GroupRuntime {
    shared: Arc<GroupShared>,
    store: Arc<dyn StreamStore>,
    durable: bool,
    dispatched_to: u64,
}

impl GroupRuntime {
    pub(super) fn new(shared: Arc<GroupShared>, store: Arc<dyn StreamStore>, durable: bool) -> Self {
        let dispatched_to = shared.cursor.load().position;
        Self {
            shared,
            store,
            durable,
            dispatched_to,
        }
    }

    pub(super) async fn run(mut self) {
        let mut appended = self.store.watch_appends();
        let mut store_live = true;
        loop {
            if let Err(error) = self.step().await {
                tracing::warn!(
                    group = %self.shared.group,
                    filter = %self.shared.filter,
                    %error,
                    "consumer group step failed, retrying"
                );
                tokio::select! {
                    biased;
                    () = self.shared.shutdown.cancelled() => break,
                    () = tokio::time::sleep(STORE_RETRY_BACKOFF) => continue,
                }
            }

            tokio::select! {
                biased;
                () = self.shared.shutdown.cancelled() => break,
                () = self.shared.wake.notified() => {}
                changed = appended.changed(), if store_live => {
                    store_live = changed.is_ok();
                }
            }
        }

        // Persist acks that landed after the last step.
        if let Err(error) = self.advance_cursor().await {
            tracing::warn!(
                group = %self.shared.group,
                filter = %self.shared.filter,
                %error,
                "failed to persist final cursor"
            );
        }
    }

    async fn step(&mut self) -> Result<(), Error> {
        let shared = Arc::clone(&self.shared);
        let now = Instant::now();

        for (message, token) in shared.tracker.take_requeued(now) {
            shared.enqueue(message, token);
        }
        shared.publish_dead_letters();

        let free = shared.free_slots();
        if free > 0 {
            let batch = self
                .store
                .read(&shared.filter, self.dispatched_to, free)
                .await?;
            for message in batch.messages {
                let token = if shared.is_explicit() {
                    shared.tracker.register(message.clone(), now)
                } else {
                    DeliveryToken {
                        sequence: message.sequence,
                        delivery_count: 1,
                    }
                };
                shared.enqueue(message, token);
            }
            self.dispatched_to = self.dispatched_to.max(batch.scanned_to);
        }

        self.advance_cursor().await
    }

    async fn advance_cursor(&self) -> Result<(), Error> {
        let current = self.shared.cursor.load_full();
        let position = self.shared.disposed_to(self.dispatched_to);
        if position <= current.position {
            return Ok(());
        }
        let next = DurableCursor {
            position,
            ..DurableCursor::clone(&current)
        };
        if self.durable {
            self.store.save_cursor(&next).await?;
        }
        tracing::trace!(
            group = %self.shared.group,
            filter = %self.shared.filter,
            position,
            "cursor advanced"
        );
        self.shared.cursor.store(Arc::new(next));
        Ok(())
    }
}

/// Sweep task: turns elapsed ack deadlines into redeliveries.
pub(super) async fn run_sweeper(shared: Arc<GroupShared>) {
    let mut interval = tokio::time::interval(shared.config.sweep_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            () = shared.shutdown.cancelled() => break,
            _ = interval.tick() => {
                let changed = shared.tracker.sweep(Instant::now());
                if changed > 0 {
                    tracing::debug!(
                        group = %shared.group,
                        filter = %shared.filter,
                        changed,
                        "ack deadlines elapsed"
                    );
                    shared.wake.notify_one();
                }
            }
        }
    }
}
