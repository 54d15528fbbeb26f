// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Retention and limits of the durable stream.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Stream-level retention settings applied by the store.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct StreamConfig {
    /// Largest accepted payload, in bytes.
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
    /// Maximum number of retained messages. Unlimited when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_msgs: Option<usize>,
    /// Maximum retained payload bytes. Unlimited when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_bytes: Option<usize>,
    /// What to do when a limit is reached.
    #[serde(default)]
    pub discard: DiscardPolicy,
    /// How long a message id is remembered for publish deduplication, in milliseconds.
    #[serde(default = "default_duplicate_window_ms")]
    pub duplicate_window_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: default_max_payload_bytes(),
            max_msgs: None,
            max_bytes: None,
            discard: DiscardPolicy::default(),
            duplicate_window_ms: default_duplicate_window_ms(),
        }
    }
}

impl StreamConfig {
    /// Deduplication window.
    #[must_use]
    pub const fn duplicate_window(&self) -> Duration {
        Duration::from_millis(self.duplicate_window_ms)
    }

    /// Returns validation errors for this section.
    #[must_use]
    pub fn validation_errors(&self, path_prefix: &str) -> Vec<String> {
        let mut errors = Vec::new();
        if self.max_payload_bytes == 0 {
            errors.push(format!("{path_prefix}.max_payload_bytes must be greater than 0"));
        }
        if self.max_msgs == Some(0) {
            errors.push(format!("{path_prefix}.max_msgs must be greater than 0"));
        }
        if let Some(max_bytes) = self.max_bytes {
            if max_bytes < self.max_payload_bytes {
                errors.push(format!(
                    "{path_prefix}.max_bytes must be at least max_payload_bytes ({})",
                    self.max_payload_bytes
                ));
            }
        }
        errors
    }
}

/// Behavior of a full stream.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DiscardPolicy {
    /// Evict the oldest messages to make room.
    #[default]
    Old,
    /// Reject the incoming message.
    New,
}

const fn default_max_payload_bytes() -> usize {
    1024 * 1024
}

const fn default_duplicate_window_ms() -> u64 {
    120_000
}
