// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Process-local store backend.
//!
//! Messages live in a `VecDeque` ordered by sequence, so reads locate their
//! start with a binary search. Named stores are kept in a process-wide
//! registry: two connections to `memory://orders` see the same stream, and
//! the stream outlives the connections the way an external server would.

use super::{
    AppendAck, AppendOptions, CursorKey, DurableCursor, ReadBatch, StoreCapabilities, StoreError,
    StoredMessage, StreamStore,
};
use crate::envelope::Envelope;
use ackstream_config::{DiscardPolicy, StreamConfig, Subject, SubjectFilter};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::SystemTime;
use tokio::sync::watch;
use tokio::time::Instant;

static REGISTRY: LazyLock<Mutex<HashMap<String, Arc<InMemoryStore>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

struct StoreState {
    messages: VecDeque<StoredMessage>,
    retained_bytes: usize,
    last_sequence: u64,
    // Dedup key -> original sequence, plus insertion order for window pruning.
    dedup: HashMap<Arc<str>, u64>,
    dedup_order: VecDeque<(Instant, Arc<str>)>,
    cursors: HashMap<CursorKey, u64>,
}

/// In-memory [`StreamStore`].
pub struct InMemoryStore {
    name: String,
    config: StreamConfig,
    state: Mutex<StoreState>,
    appended: watch::Sender<u64>,
    reachable: AtomicBool,
}

impl InMemoryStore {
    /// Creates a standalone store that is not registered under its name.
    #[must_use]
    pub fn new(name: impl Into<String>, config: StreamConfig) -> Self {
        let (appended, _) = watch::channel(0);
        Self {
            name: name.into(),
            config,
            state: Mutex::new(StoreState {
                messages: VecDeque::new(),
                retained_bytes: 0,
                last_sequence: 0,
                dedup: HashMap::new(),
                dedup_order: VecDeque::new(),
                cursors: HashMap::new(),
            }),
            appended,
            reachable: AtomicBool::new(true),
        }
    }

    /// Returns the process-wide store registered as `name`, creating it with
    /// `config` on first use.
    ///
    /// A registered store keeps the configuration it was created with.
    pub fn shared(name: &str, config: &StreamConfig) -> Arc<Self> {
        let store = REGISTRY
            .lock()
            .entry(name.to_owned())
            .or_insert_with(|| Arc::new(Self::new(name, config.clone())))
            .clone();
        if store.config != *config {
            tracing::warn!(
                store = name,
                requested = ?config,
                active = ?store.config,
                "in-memory store already exists with a different stream config, keeping the active one"
            );
        }
        store
    }

    /// Store name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stream configuration the store was created with.
    #[must_use]
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Simulates losing (`false`) or regaining (`true`) the store.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::Release);
    }

    /// Number of retained messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().messages.len()
    }

    /// Returns `true` when no message is retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_reachable(&self) -> Result<(), StoreError> {
        if self.reachable.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StoreError::Unavailable {
                store: self.name.clone(),
            })
        }
    }

    fn prune_dedup(&self, state: &mut StoreState, now: Instant) {
        let window = self.config.duplicate_window();
        while let Some((at, _)) = state.dedup_order.front() {
            if now.duration_since(*at) < window {
                break;
            }
            if let Some((_, id)) = state.dedup_order.pop_front() {
                _ = state.dedup.remove(&id);
            }
        }
    }

    /// Makes room for a payload of `size` bytes according to the discard policy.
    fn enforce_limits(&self, state: &mut StoreState, size: usize) -> Result<(), StoreError> {
        let over = |state: &StoreState| {
            self.config
                .max_msgs
                .is_some_and(|max| state.messages.len() + 1 > max)
                || self
                    .config
                    .max_bytes
                    .is_some_and(|max| state.retained_bytes + size > max)
        };
        if !over(&*state) {
            return Ok(());
        }
        match self.config.discard {
            DiscardPolicy::New => Err(StoreError::StreamFull {
                store: self.name.clone(),
            }),
            DiscardPolicy::Old => {
                while over(&*state) {
                    let Some(evicted) = state.messages.pop_front() else {
                        break;
                    };
                    state.retained_bytes -= evicted.envelope.payload().len();
                }
                Ok(())
            }
        }
    }
}

#[async_trait]
impl StreamStore for InMemoryStore {
    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities {
            backend_name: "memory",
            supports_dedup: true,
            supports_start_time: true,
        }
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check_reachable()
    }

    async fn append(
        &self,
        subject: &Subject,
        envelope: Envelope,
        options: AppendOptions,
    ) -> Result<AppendAck, StoreError> {
        self.check_reachable()?;
        let size = envelope.payload().len();
        if size > self.config.max_payload_bytes {
            return Err(StoreError::PayloadTooLarge {
                size,
                max: self.config.max_payload_bytes,
            });
        }

        let sequence = {
            let mut state = self.state.lock();
            let now = Instant::now();
            self.prune_dedup(&mut state, now);
            if let Some(id) = &options.dedup_id {
                if let Some(&sequence) = state.dedup.get(id) {
                    return Ok(AppendAck {
                        sequence,
                        duplicate: true,
                    });
                }
            }
            self.enforce_limits(&mut state, size)?;

            state.last_sequence += 1;
            let sequence = state.last_sequence;
            state.messages.push_back(StoredMessage {
                sequence,
                subject: subject.clone(),
                timestamp: SystemTime::now(),
                envelope: envelope.with_subject(subject.clone()),
            });
            state.retained_bytes += size;
            if let Some(id) = options.dedup_id {
                _ = state.dedup.insert(id.clone(), sequence);
                state.dedup_order.push_back((now, id));
            }
            sequence
        };

        _ = self.appended.send_replace(sequence);
        Ok(AppendAck {
            sequence,
            duplicate: false,
        })
    }

    async fn read(
        &self,
        filter: &SubjectFilter,
        after: u64,
        limit: usize,
    ) -> Result<ReadBatch, StoreError> {
        self.check_reachable()?;
        if limit == 0 {
            return Ok(ReadBatch {
                messages: Vec::new(),
                scanned_to: after,
            });
        }

        let state = self.state.lock();
        let start = state.messages.partition_point(|m| m.sequence <= after);
        let mut messages = Vec::new();
        let mut scanned_to = state.last_sequence.max(after);
        for message in state.messages.range(start..) {
            if filter.matches(&message.subject) {
                messages.push(message.clone());
                if messages.len() == limit {
                    scanned_to = message.sequence;
                    break;
                }
            }
        }
        Ok(ReadBatch {
            messages,
            scanned_to,
        })
    }

    async fn last_sequence(&self) -> Result<u64, StoreError> {
        self.check_reachable()?;
        Ok(self.state.lock().last_sequence)
    }

    async fn last_sequence_matching(
        &self,
        filter: &SubjectFilter,
    ) -> Result<Option<u64>, StoreError> {
        self.check_reachable()?;
        Ok(self
            .state
            .lock()
            .messages
            .iter()
            .rev()
            .find(|m| filter.matches(&m.subject))
            .map(|m| m.sequence))
    }

    async fn first_sequence_since(&self, since: SystemTime) -> Result<Option<u64>, StoreError> {
        self.check_reachable()?;
        Ok(self
            .state
            .lock()
            .messages
            .iter()
            .find(|m| m.timestamp >= since)
            .map(|m| m.sequence))
    }

    async fn load_cursor(&self, key: &CursorKey) -> Result<Option<u64>, StoreError> {
        self.check_reachable()?;
        Ok(self.state.lock().cursors.get(key).copied())
    }

    async fn save_cursor(&self, cursor: &DurableCursor) -> Result<(), StoreError> {
        self.check_reachable()?;
        let mut state = self.state.lock();
        let position = state.cursors.entry(cursor.key()).or_insert(0);
        // Positions never move backwards.
        *position = (*position).max(cursor.position);
        Ok(())
    }

    async fn delete_cursor(&self, key: &CursorKey) -> Result<(), StoreError> {
        self.check_reachable()?;
        _ = self.state.lock().cursors.remove(key);
        Ok(())
    }

    fn watch_appends(&self) -> watch::Receiver<u64> {
        self.appended.subscribe()
    }
}
