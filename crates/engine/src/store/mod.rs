// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Durable stream store seam.
//!
//! The engine never owns persistence. Everything it needs from the store is
//! expressed by [`StreamStore`]:
//!
//! ```text
//!   Publisher ── append ──▶ StreamStore ◀── read / cursors ── consumer group
//!                               │
//!                               └── watch_appends ──▶ wakes idle groups
//! ```
//!
//! Sequences are assigned by the store, start at 1 and strictly increase
//! across the whole stream. A cursor position `p` means every matching
//! message with `sequence <= p` is disposed of; delivery resumes at `p + 1`.

mod capabilities;
mod in_memory;

pub use capabilities::StoreCapabilities;
pub(crate) use capabilities::{validate_consumer_support, validate_publisher_support};
pub use in_memory::InMemoryStore;

use crate::envelope::Envelope;
use ackstream_config::{GroupName, Subject, SubjectFilter};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::watch;

/// A message as persisted by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    /// Stream-wide sequence.
    pub sequence: u64,
    /// Subject the message was published on.
    pub subject: Subject,
    /// Store-side append time.
    pub timestamp: SystemTime,
    /// The published envelope, bound to `subject`.
    pub envelope: Envelope,
}

/// Identity of a durable cursor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CursorKey {
    /// Consumer group name.
    pub group: GroupName,
    /// Subject filter of the group.
    pub filter: SubjectFilter,
}

/// Persisted read position of a consumer group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DurableCursor {
    /// Consumer group name.
    pub group: GroupName,
    /// Subject filter of the group.
    pub filter: SubjectFilter,
    /// Highest sequence every earlier matching message has been disposed of through.
    pub position: u64,
}

impl DurableCursor {
    /// Key of this cursor.
    #[must_use]
    pub fn key(&self) -> CursorKey {
        CursorKey {
            group: self.group.clone(),
            filter: self.filter.clone(),
        }
    }
}

/// Per-append options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppendOptions {
    /// Deduplication key; a known key is not appended again.
    pub dedup_id: Option<Arc<str>>,
}

/// Store acknowledgment of one append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendAck {
    /// Sequence of the stored message.
    pub sequence: u64,
    /// `true` when the dedup key was already known and nothing was appended.
    pub duplicate: bool,
}

/// Result of a filtered read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadBatch {
    /// Matching messages, in sequence order.
    pub messages: Vec<StoredMessage>,
    /// Highest sequence examined. Every message in `(after, scanned_to]`
    /// that matches the filter is in `messages`.
    pub scanned_to: u64,
}

/// Store-level failures.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store cannot be reached right now.
    #[error("store `{store}` is unavailable")]
    Unavailable {
        /// Store name.
        store: String,
    },
    /// The payload exceeds the stream's `max_payload_bytes`.
    #[error("payload of {size} bytes exceeds the {max} bytes limit")]
    PayloadTooLarge {
        /// Payload size.
        size: usize,
        /// Configured limit.
        max: usize,
    },
    /// The stream is at its limits and discards new messages.
    #[error("stream `{store}` is full")]
    StreamFull {
        /// Store name.
        store: String,
    },
}

/// Append-only subject-partitioned log with durable cursors.
#[async_trait]
pub trait StreamStore: Send + Sync + 'static {
    /// Returns backend capability declarations.
    fn capabilities(&self) -> StoreCapabilities;

    /// Checks reachability.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Appends one message and returns its sequence.
    async fn append(
        &self,
        subject: &Subject,
        envelope: Envelope,
        options: AppendOptions,
    ) -> Result<AppendAck, StoreError>;

    /// Reads up to `limit` messages matching `filter` with `sequence > after`.
    async fn read(
        &self,
        filter: &SubjectFilter,
        after: u64,
        limit: usize,
    ) -> Result<ReadBatch, StoreError>;

    /// Highest assigned sequence, 0 for an empty stream.
    async fn last_sequence(&self) -> Result<u64, StoreError>;

    /// Highest retained sequence matching `filter`.
    async fn last_sequence_matching(
        &self,
        filter: &SubjectFilter,
    ) -> Result<Option<u64>, StoreError>;

    /// First retained sequence stored at or after `since`.
    async fn first_sequence_since(&self, since: SystemTime) -> Result<Option<u64>, StoreError>;

    /// Loads a persisted cursor position.
    async fn load_cursor(&self, key: &CursorKey) -> Result<Option<u64>, StoreError>;

    /// Persists a cursor position.
    async fn save_cursor(&self, cursor: &DurableCursor) -> Result<(), StoreError>;

    /// Forgets a cursor.
    async fn delete_cursor(&self, key: &CursorKey) -> Result<(), StoreError>;

    /// Watches the last assigned sequence.
    fn watch_appends(&self) -> watch::Receiver<u64>;
}
