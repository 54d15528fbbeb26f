// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Consumer groups: membership, flow control and delivery tracking.
//!
//! A consumer group is identified by `(group name, subject filter)`. Joining
//! an existing group attaches new workers to it; joining with a durable name
//! that has a persisted cursor resumes from that cursor. Groups without a
//! durable name are ephemeral: each join creates a fresh group that
//! disappears with its last worker.

mod delivery;
mod group;
pub mod tracker;

#[cfg(test)]
mod tests;

pub use delivery::Delivery;
pub use tracker::{
    AckOutcome, DeadLetter, DeliveryRecord, DeliveryStatus, DeliveryToken, DeliveryTracker,
    TrackerStats,
};

use crate::error::Error;
use crate::store::{CursorKey, DurableCursor, StreamStore, validate_consumer_support};
use ackstream_config::{ConsumerConfig, DeliverPolicy, GroupName, SubjectFilter};
use delivery::DeliveryAckHandler;
use group::{GroupRuntime, GroupShared, QueuedDelivery, run_sweeper};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Identifies one worker of one group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkerId {
    key: CursorKey,
    index: u64,
}

impl WorkerId {
    /// Group name of the worker.
    #[must_use]
    pub fn group(&self) -> &GroupName {
        &self.key.group
    }

    /// Subject filter of the worker's group.
    #[must_use]
    pub fn filter(&self) -> &SubjectFilter {
        &self.key.filter
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}#{}", self.key.group, self.key.filter, self.index)
    }
}

/// Receiving side of one worker.
pub struct WorkerQueue {
    id: WorkerId,
    receiver: flume::Receiver<QueuedDelivery>,
    shared: Arc<GroupShared>,
    cancel: CancellationToken,
}

impl WorkerQueue {
    /// Identity of this worker.
    #[must_use]
    pub fn id(&self) -> &WorkerId {
        &self.id
    }

    /// Waits for the next delivery.
    ///
    /// Returns `None` once the worker left its group or the group closed.
    /// Queued attempts superseded by a redelivery are skipped.
    pub async fn recv(&mut self) -> Option<Delivery> {
        loop {
            let queued = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return None,
                queued = self.receiver.recv_async() => queued.ok()?,
            };

            if !self.shared.is_explicit() {
                self.shared.hand_off(queued.token.sequence);
                return Some(Delivery::new_without_ack(queued.message, queued.token));
            }
            if !self.shared.tracker.is_current(queued.token) {
                tracing::debug!(
                    worker = %self.id,
                    sequence = queued.token.sequence,
                    delivery_count = queued.token.delivery_count,
                    "skipping superseded delivery"
                );
                continue;
            }
            let handler: Arc<dyn DeliveryAckHandler> = self.shared.clone();
            return Some(Delivery::new(queued.message, queued.token, handler));
        }
    }
}

/// Read-only view of a group's progress.
#[derive(Clone)]
pub struct GroupMonitor {
    shared: Arc<GroupShared>,
}

impl GroupMonitor {
    /// Group name.
    #[must_use]
    pub fn group(&self) -> &GroupName {
        &self.shared.group
    }

    /// Subject filter.
    #[must_use]
    pub fn filter(&self) -> &SubjectFilter {
        &self.shared.filter
    }

    /// Current cursor.
    #[must_use]
    pub fn cursor(&self) -> DurableCursor {
        DurableCursor::clone(&self.shared.cursor.load())
    }

    /// Number of deliveries not yet acknowledged or expired.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.tracker.outstanding()
    }

    /// Delivery counters.
    #[must_use]
    pub fn stats(&self) -> TrackerStats {
        self.shared.tracker.stats()
    }

    /// Outstanding record for `sequence`.
    #[must_use]
    pub fn record(&self, sequence: u64) -> Option<DeliveryRecord> {
        self.shared.tracker.record(sequence)
    }

    /// Subscribes to messages that exhausted `max_deliver`.
    #[must_use]
    pub fn dead_letters(&self) -> broadcast::Receiver<DeadLetter> {
        self.shared.dead_letters.subscribe()
    }

    /// Returns `true` once the group stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }
}

/// Result of [`ConsumerGroupCoordinator::join`].
pub struct GroupMembership {
    /// Name of the joined group, generated for ephemeral groups.
    pub group: GroupName,
    /// One queue per requested worker.
    pub workers: Vec<WorkerQueue>,
    /// Progress view of the group.
    pub monitor: GroupMonitor,
}

impl GroupMembership {
    /// Identities of the joined workers.
    #[must_use]
    pub fn worker_ids(&self) -> Vec<WorkerId> {
        self.workers.iter().map(|w| w.id.clone()).collect()
    }

    /// Current cursor of the group.
    #[must_use]
    pub fn cursor(&self) -> DurableCursor {
        self.monitor.cursor()
    }

    /// Current pending count of the group.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.monitor.pending()
    }
}

struct GroupEntry {
    shared: Arc<GroupShared>,
    members: HashMap<u64, CancellationToken>,
    tasks: Vec<JoinHandle<()>>,
}

/// Assigns stream positions to the workers of every consumer group.
pub struct ConsumerGroupCoordinator {
    endpoint: String,
    store: Arc<dyn StreamStore>,
    shutdown: CancellationToken,
    groups: Mutex<HashMap<CursorKey, GroupEntry>>,
    next_worker: AtomicU64,
    next_ephemeral: AtomicU64,
}

impl ConsumerGroupCoordinator {
    /// Creates a coordinator over `store`. Cancelling `shutdown` stops every group.
    #[must_use]
    pub fn new(
        endpoint: impl Into<String>,
        store: Arc<dyn StreamStore>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            store,
            shutdown,
            groups: Mutex::new(HashMap::new()),
            next_worker: AtomicU64::new(1),
            next_ephemeral: AtomicU64::new(1),
        }
    }

    /// Joins (creating if needed) the group described by `config` on `filter`
    /// with `config.worker_count` workers.
    pub async fn join(
        &self,
        filter: &SubjectFilter,
        config: ConsumerConfig,
    ) -> Result<GroupMembership, Error> {
        if self.shutdown.is_cancelled() {
            return Err(Error::ConnectionClosed {
                endpoint: self.endpoint.clone(),
            });
        }
        let errors = config.validation_errors("consumer");
        if !errors.is_empty() {
            return Err(Error::InvalidConfig {
                context: format!("subscription on `{filter}`"),
                reason: errors.join("; "),
            });
        }
        validate_consumer_support(&config, self.store.capabilities())?;

        let group = match &config.durable {
            Some(group) => group.clone(),
            None => self.ephemeral_name()?,
        };
        let key = CursorKey {
            group: group.clone(),
            filter: filter.clone(),
        };

        // Resolve the start position before taking the registry lock.
        let known = self.groups.lock().contains_key(&key);
        let position = if known {
            0
        } else {
            self.initial_position(&key, &config).await?
        };

        let mut groups = self.groups.lock();
        if !groups.contains_key(&key) {
            if known {
                // The group stopped between the two lookups.
                return Err(Error::GroupClosed {
                    group: group.to_string(),
                    filter: filter.to_string(),
                });
            }
            let entry = self.start_group(key.clone(), config.clone(), position);
            _ = groups.insert(key.clone(), entry);
        }
        let Some(entry) = groups.get_mut(&key) else {
            return Err(Error::Internal {
                message: format!("consumer group `{group}` vanished while joining"),
            });
        };
        if !entry.shared.config.same_group_policy(&config) {
            return Err(Error::InvalidConfig {
                context: format!("consumer group `{group}` on `{filter}`"),
                reason: "settings differ from the running group".to_owned(),
            });
        }

        let mut workers = Vec::with_capacity(config.worker_count);
        for _ in 0..config.worker_count {
            let index = self.next_worker.fetch_add(1, Ordering::Relaxed);
            let cancel = entry.shared.shutdown.child_token();
            _ = entry.members.insert(index, cancel.clone());
            workers.push(WorkerQueue {
                id: WorkerId {
                    key: key.clone(),
                    index,
                },
                receiver: entry.shared.queue_rx.clone(),
                shared: entry.shared.clone(),
                cancel,
            });
        }
        tracing::info!(
            group = %group,
            filter = %filter,
            workers = config.worker_count,
            members = entry.members.len(),
            "joined consumer group"
        );

        Ok(GroupMembership {
            group,
            workers,
            monitor: GroupMonitor {
                shared: entry.shared.clone(),
            },
        })
    }

    /// Removes one worker. The last worker leaving stops the group; a durable
    /// group keeps its persisted cursor, an ephemeral group is forgotten.
    pub async fn leave(&self, worker: &WorkerId) {
        let stopped = {
            let mut groups = self.groups.lock();
            let Some(entry) = groups.get_mut(&worker.key) else {
                return;
            };
            if let Some(cancel) = entry.members.remove(&worker.index) {
                cancel.cancel();
            }
            if entry.members.is_empty() {
                groups.remove(&worker.key)
            } else {
                None
            }
        };
        tracing::info!(worker = %worker, "left consumer group");
        if let Some(entry) = stopped {
            self.stop_group(entry).await;
        }
    }

    /// Stops every group.
    pub async fn close(&self) {
        let entries: Vec<GroupEntry> = self.groups.lock().drain().map(|(_, e)| e).collect();
        for entry in entries {
            self.stop_group(entry).await;
        }
    }

    /// Number of running groups.
    #[must_use]
    pub fn group_count(&self) -> usize {
        self.groups.lock().len()
    }

    fn ephemeral_name(&self) -> Result<GroupName, Error> {
        let n = self.next_ephemeral.fetch_add(1, Ordering::Relaxed);
        GroupName::parse(&format!("ephemeral-{n}")).map_err(|message| Error::Internal { message })
    }

    async fn initial_position(&self, key: &CursorKey, config: &ConsumerConfig) -> Result<u64, Error> {
        if config.is_durable() {
            if let Some(position) = self.store.load_cursor(key).await? {
                tracing::info!(
                    group = %key.group,
                    filter = %key.filter,
                    position,
                    "resuming durable cursor"
                );
                return Ok(position);
            }
        }
        let position = match config.deliver_policy {
            DeliverPolicy::All => 0,
            DeliverPolicy::New => self.store.last_sequence().await?,
            DeliverPolicy::Last => self
                .store
                .last_sequence_matching(&key.filter)
                .await?
                .map_or(0, |sequence| sequence - 1),
            DeliverPolicy::ByStartTime => {
                let since = SystemTime::UNIX_EPOCH
                    + Duration::from_millis(config.start_time_ms.unwrap_or_default());
                match self.store.first_sequence_since(since).await? {
                    Some(sequence) => sequence - 1,
                    None => self.store.last_sequence().await?,
                }
            }
        };
        Ok(position)
    }

    fn start_group(&self, key: CursorKey, config: ConsumerConfig, position: u64) -> GroupEntry {
        let durable = config.is_durable();
        let shared = Arc::new(GroupShared::new(
            key.group,
            key.filter,
            config,
            position,
            self.shutdown.child_token(),
        ));
        let fetch = tokio::spawn(GroupRuntime::new(shared.clone(), self.store.clone(), durable).run());
        let sweep = tokio::spawn(run_sweeper(shared.clone()));
        tracing::info!(
            group = %shared.group,
            filter = %shared.filter,
            position,
            durable,
            "started consumer group"
        );
        GroupEntry {
            shared,
            members: HashMap::new(),
            tasks: vec![fetch, sweep],
        }
    }

    async fn stop_group(&self, entry: GroupEntry) {
        entry.shared.shutdown.cancel();
        for task in entry.tasks {
            if let Err(error) = task.await {
                tracing::error!(group = %entry.shared.group, %error, "consumer group task failed");
            }
        }
        if !entry.shared.config.is_durable() {
            let key = CursorKey {
                group: entry.shared.group.clone(),
                filter: entry.shared.filter.clone(),
            };
            if let Err(error) = self.store.delete_cursor(&key).await {
                tracing::warn!(
                    group = %key.group,
                    filter = %key.filter,
                    %error,
                    "failed to reclaim ephemeral cursor"
                );
            }
        }
        tracing::info!(
            group = %entry.shared.group,
            filter = %entry.shared.filter,
            position = entry.shared.cursor.load().position,
            pending = entry.shared.tracker.outstanding(),
            "stopped consumer group"
        );
    }
}
