// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Per-group acknowledgment tracking.
//!
//! Every delivery attempt is named by a [`DeliveryToken`]. Transitions are
//! compare-and-set on that token under one short lock, so an ack racing the
//! timeout sweep resolves to exactly one winner:
//!
//! ```text
//!            register
//!               │
//!               ▼
//!   ┌──────▶ pending ──ack──▶ acked (removed)
//!   │           │
//!   │     nack / deadline
//!   │           │
//!   │           ├── delivery_count == max_deliver ──▶ expired (removed, dead letter)
//!   │           ▼
//!   └─take── nacked (delivery_count + 1)
//! ```
//!
//! Terminal records are dropped from the table, which is therefore exactly
//! the set of outstanding messages. The low-water mark is the smallest
//! outstanding sequence minus one.

use crate::store::StoredMessage;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Names one delivery attempt of one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeliveryToken {
    /// Stream sequence of the message.
    pub sequence: u64,
    /// Attempt number, starting at 1.
    pub delivery_count: u32,
}

/// Status of an outstanding delivery record.
///
/// Records are removed once terminal, so there is no acked or expired
/// status here: an ack reports [`AckOutcome::Acked`], and expiry reports
/// [`AckOutcome::Expired`] and emits a [`DeadLetter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// Handed to a worker, awaiting ack or nack.
    Pending,
    /// Rejected or timed out, waiting to be handed out again.
    Nacked,
}

/// Snapshot of one outstanding delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryRecord {
    /// Id of the delivered envelope.
    pub envelope_id: Arc<str>,
    /// Stream sequence, the record's cursor position.
    pub sequence: u64,
    /// Current attempt number.
    pub delivery_count: u32,
    /// Current status.
    pub status: DeliveryStatus,
    /// Redelivery deadline of the current attempt.
    pub deadline: Instant,
}

/// Result of an ack or nack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// The delivery is acknowledged.
    Acked,
    /// The message will be delivered again with this attempt number.
    Requeued {
        /// Attempt number of the redelivery.
        delivery_count: u32,
    },
    /// The last allowed attempt failed; the message is dropped.
    Expired,
    /// The message is no longer tracked.
    AlreadyTerminal,
    /// A newer attempt superseded this token.
    Stale,
}

/// A message that exhausted `max_deliver`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    /// The expired message.
    pub message: StoredMessage,
    /// Number of attempts made.
    pub delivery_count: u32,
    /// Reason given by the last rejection.
    pub reason: String,
}

/// Counters of one tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrackerStats {
    /// First delivery attempts.
    pub delivered: u64,
    /// Redelivery attempts.
    pub redelivered: u64,
    /// Acknowledged messages.
    pub acked: u64,
    /// Explicit nacks and timeouts.
    pub nacked: u64,
    /// Expired messages.
    pub expired: u64,
    /// Acks and nacks ignored because their token was superseded or terminal.
    pub ignored: u64,
}

struct TrackedDelivery {
    message: StoredMessage,
    delivery_count: u32,
    status: DeliveryStatus,
    deadline: Instant,
}

struct TrackerState {
    records: BTreeMap<u64, TrackedDelivery>,
    dead_letters: Vec<DeadLetter>,
    stats: TrackerStats,
}

/// Delivery state machine of one consumer group.
pub struct DeliveryTracker {
    ack_wait: Duration,
    max_deliver: u32,
    state: Mutex<TrackerState>,
}

impl DeliveryTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new(ack_wait: Duration, max_deliver: u32) -> Self {
        Self {
            ack_wait,
            max_deliver: max_deliver.max(1),
            state: Mutex::new(TrackerState {
                records: BTreeMap::new(),
                dead_letters: Vec::new(),
                stats: TrackerStats::default(),
            }),
        }
    }

    /// Records the first delivery attempt of `message`.
    pub fn register(&self, message: StoredMessage, now: Instant) -> DeliveryToken {
        let token = DeliveryToken {
            sequence: message.sequence,
            delivery_count: 1,
        };
        let mut state = self.state.lock();
        state.stats.delivered += 1;
        _ = state.records.insert(
            message.sequence,
            TrackedDelivery {
                message,
                delivery_count: 1,
                status: DeliveryStatus::Pending,
                deadline: now + self.ack_wait,
            },
        );
        token
    }

    /// Acknowledges the attempt named by `token`.
    pub fn ack(&self, token: DeliveryToken) -> AckOutcome {
        let mut state = self.state.lock();
        let outcome = match state.records.get(&token.sequence) {
            None => AckOutcome::AlreadyTerminal,
            Some(record) if !Self::matches(record, token) => AckOutcome::Stale,
            Some(_) => {
                _ = state.records.remove(&token.sequence);
                AckOutcome::Acked
            }
        };
        match outcome {
            AckOutcome::Acked => state.stats.acked += 1,
            _ => state.stats.ignored += 1,
        }
        outcome
    }

    /// Rejects the attempt named by `token`.
    pub fn nack(&self, token: DeliveryToken, reason: &str) -> AckOutcome {
        let mut state = self.state.lock();
        match state.records.get(&token.sequence) {
            None => {
                state.stats.ignored += 1;
                AckOutcome::AlreadyTerminal
            }
            Some(record) if !Self::matches(record, token) => {
                state.stats.ignored += 1;
                AckOutcome::Stale
            }
            Some(_) => self.reject(&mut state, token.sequence, reason),
        }
    }

    /// Treats every pending attempt whose deadline passed as rejected.
    ///
    /// Returns the number of records that changed.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut state = self.state.lock();
        let expired: Vec<u64> = state
            .records
            .iter()
            .filter(|(_, r)| r.status == DeliveryStatus::Pending && r.deadline <= now)
            .map(|(sequence, _)| *sequence)
            .collect();
        for sequence in &expired {
            _ = self.reject(&mut state, *sequence, "ack wait elapsed");
        }
        expired.len()
    }

    /// Moves every nacked record back to pending and returns the attempts to
    /// hand out, in sequence order.
    pub fn take_requeued(&self, now: Instant) -> Vec<(StoredMessage, DeliveryToken)> {
        let mut state = self.state.lock();
        let mut requeued = Vec::new();
        for (sequence, record) in state.records.iter_mut() {
            if record.status != DeliveryStatus::Nacked {
                continue;
            }
            record.status = DeliveryStatus::Pending;
            record.deadline = now + self.ack_wait;
            requeued.push((
                record.message.clone(),
                DeliveryToken {
                    sequence: *sequence,
                    delivery_count: record.delivery_count,
                },
            ));
        }
        state.stats.redelivered += requeued.len() as u64;
        requeued
    }

    /// Returns `true` while `token` names the live pending attempt.
    #[must_use]
    pub fn is_current(&self, token: DeliveryToken) -> bool {
        self.state
            .lock()
            .records
            .get(&token.sequence)
            .is_some_and(|r| r.status == DeliveryStatus::Pending && Self::matches(r, token))
    }

    /// Number of messages not yet acknowledged or expired.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.state.lock().records.len()
    }

    /// Highest position the cursor may advance to, given that everything up
    /// to `dispatched_to` was handed out.
    #[must_use]
    pub fn low_water_mark(&self, dispatched_to: u64) -> u64 {
        self.state
            .lock()
            .records
            .keys()
            .next()
            .map_or(dispatched_to, |lowest| lowest.saturating_sub(1).min(dispatched_to))
    }

    /// Snapshot of the outstanding record for `sequence`.
    #[must_use]
    pub fn record(&self, sequence: u64) -> Option<DeliveryRecord> {
        self.state
            .lock()
            .records
            .get(&sequence)
            .map(|r| DeliveryRecord {
                envelope_id: Arc::from(r.message.envelope.id()),
                sequence,
                delivery_count: r.delivery_count,
                status: r.status,
                deadline: r.deadline,
            })
    }

    /// Earliest deadline among pending records.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.state
            .lock()
            .records
            .values()
            .filter(|r| r.status == DeliveryStatus::Pending)
            .map(|r| r.deadline)
            .min()
    }

    /// Drains expired messages.
    pub fn take_dead_letters(&self) -> Vec<DeadLetter> {
        std::mem::take(&mut self.state.lock().dead_letters)
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> TrackerStats {
        self.state.lock().stats
    }

    fn matches(record: &TrackedDelivery, token: DeliveryToken) -> bool {
        record.delivery_count == token.delivery_count
    }

    fn reject(&self, state: &mut TrackerState, sequence: u64, reason: &str) -> AckOutcome {
        state.stats.nacked += 1;
        let Some(record) = state.records.get_mut(&sequence) else {
            return AckOutcome::AlreadyTerminal;
        };
        if record.delivery_count >= self.max_deliver {
            let delivery_count = record.delivery_count;
            if let Some(record) = state.records.remove(&sequence) {
                state.dead_letters.push(DeadLetter {
                    message: record.message,
                    delivery_count,
                    reason: reason.to_owned(),
                });
            }
            state.stats.expired += 1;
            return AckOutcome::Expired;
        }
        record.delivery_count += 1;
        record.status = DeliveryStatus::Nacked;
        AckOutcome::Requeued {
            delivery_count: record.delivery_count,
        }
    }
}
