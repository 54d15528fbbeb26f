// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Consumer group settings: acknowledgment, redelivery and flow control.

use crate::subject::GroupName;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings of one subscription's consumer group.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ConsumerConfig {
    /// Durable group name. Without it the group is ephemeral and its cursor
    /// is dropped when the last worker leaves.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub durable: Option<GroupName>,
    /// Number of concurrent workers competing on the group queue.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Time a delivery may stay unacknowledged before redelivery, in milliseconds.
    #[serde(default = "default_ack_wait_ms")]
    pub ack_wait_ms: u64,
    /// Maximum number of unacknowledged deliveries for the group.
    #[serde(default = "default_max_ack_pending")]
    pub max_ack_pending: usize,
    /// Maximum number of delivery attempts per message.
    #[serde(default = "default_max_deliver")]
    pub max_deliver: u32,
    /// How deliveries are acknowledged.
    #[serde(default)]
    pub ack_policy: AckPolicy,
    /// Where a newly created cursor starts.
    #[serde(default)]
    pub deliver_policy: DeliverPolicy,
    /// Start time for `deliver_policy: by_start_time`, in milliseconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time_ms: Option<u64>,
    /// Time allowed for in-flight handlers when closing, in milliseconds.
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,
    /// Period of the ack-deadline sweep, in milliseconds.
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            durable: None,
            worker_count: default_worker_count(),
            ack_wait_ms: default_ack_wait_ms(),
            max_ack_pending: default_max_ack_pending(),
            max_deliver: default_max_deliver(),
            ack_policy: AckPolicy::default(),
            deliver_policy: DeliverPolicy::default(),
            start_time_ms: None,
            close_timeout_ms: default_close_timeout_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
        }
    }
}

impl ConsumerConfig {
    /// Builds a durable consumer configuration with `worker_count` workers.
    #[must_use]
    pub fn durable(group: GroupName, worker_count: usize) -> Self {
        Self {
            durable: Some(group),
            worker_count,
            ..Self::default()
        }
    }

    /// Ack deadline.
    #[must_use]
    pub const fn ack_wait(&self) -> Duration {
        Duration::from_millis(self.ack_wait_ms)
    }

    /// Close timeout.
    #[must_use]
    pub const fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    /// Sweep period.
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// Returns `true` when the group cursor survives its last member.
    #[must_use]
    pub const fn is_durable(&self) -> bool {
        self.durable.is_some()
    }

    /// Returns `true` when `other` describes the same group behavior.
    ///
    /// `worker_count` and `close_timeout_ms` are per-member settings and are
    /// ignored.
    #[must_use]
    pub fn same_group_policy(&self, other: &Self) -> bool {
        self.durable == other.durable
            && self.ack_wait_ms == other.ack_wait_ms
            && self.max_ack_pending == other.max_ack_pending
            && self.max_deliver == other.max_deliver
            && self.ack_policy == other.ack_policy
            && self.deliver_policy == other.deliver_policy
            && self.start_time_ms == other.start_time_ms
            && self.sweep_interval_ms == other.sweep_interval_ms
    }

    /// Returns validation errors for this section.
    #[must_use]
    pub fn validation_errors(&self, path_prefix: &str) -> Vec<String> {
        let mut errors = Vec::new();
        if self.worker_count == 0 {
            errors.push(format!("{path_prefix}.worker_count must be greater than 0"));
        } else if self.worker_count > 1 && self.durable.is_none() {
            errors.push(format!(
                "{path_prefix}.worker_count > 1 requires a durable group name"
            ));
        }
        if self.ack_wait_ms == 0 {
            errors.push(format!("{path_prefix}.ack_wait_ms must be greater than 0"));
        }
        if self.max_ack_pending == 0 {
            errors.push(format!("{path_prefix}.max_ack_pending must be greater than 0"));
        }
        if self.max_deliver == 0 {
            errors.push(format!("{path_prefix}.max_deliver must be greater than 0"));
        }
        if self.sweep_interval_ms == 0 {
            errors.push(format!("{path_prefix}.sweep_interval_ms must be greater than 0"));
        }
        match (self.deliver_policy, self.start_time_ms) {
            (DeliverPolicy::ByStartTime, None) => errors.push(format!(
                "{path_prefix}.start_time_ms is required with deliver_policy by_start_time"
            )),
            (DeliverPolicy::ByStartTime, Some(_)) | (_, None) => {}
            (_, Some(_)) => errors.push(format!(
                "{path_prefix}.start_time_ms is only valid with deliver_policy by_start_time"
            )),
        }
        errors
    }
}

/// How deliveries get acknowledged.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AckPolicy {
    /// The handler outcome acknowledges or rejects each delivery.
    #[default]
    Explicit,
    /// Deliveries are acknowledged when handed to a worker.
    None,
}

/// Where a newly created cursor starts reading.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeliverPolicy {
    /// From the first retained message.
    #[default]
    All,
    /// Only messages published after the cursor is created.
    New,
    /// From the last message matching the filter.
    Last,
    /// From the first message stored at or after `start_time_ms`.
    ByStartTime,
}

const fn default_worker_count() -> usize {
    1
}

const fn default_ack_wait_ms() -> u64 {
    30_000
}

const fn default_max_ack_pending() -> usize {
    2048
}

const fn default_max_deliver() -> u32 {
    15
}

const fn default_close_timeout_ms() -> u64 {
    60_000
}

const fn default_sweep_interval_ms() -> u64 {
    1_000
}
