// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Publisher settings.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings of a publisher.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PublisherConfig {
    /// Maximum number of publishes awaiting store confirmation.
    #[serde(default = "default_max_pending_async")]
    pub max_pending_async: usize,
    /// Behavior once `max_pending_async` publishes are in flight.
    #[serde(default)]
    pub on_full: PublishOnFullPolicy,
    /// Send the envelope id as a deduplication key.
    #[serde(default)]
    pub track_msg_id: bool,
    /// Return from `MessagePublisher::publish` before the store confirms.
    #[serde(default)]
    pub ack_async: bool,
    /// Bound on a single store append attempt, in milliseconds.
    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,
    /// Extra attempts after a transient store failure.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Wait between two attempts, in milliseconds.
    #[serde(default = "default_retry_wait_ms")]
    pub retry_wait_ms: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            max_pending_async: default_max_pending_async(),
            on_full: PublishOnFullPolicy::default(),
            track_msg_id: false,
            ack_async: false,
            publish_timeout_ms: default_publish_timeout_ms(),
            retry_attempts: default_retry_attempts(),
            retry_wait_ms: default_retry_wait_ms(),
        }
    }
}

impl PublisherConfig {
    /// Per-attempt timeout.
    #[must_use]
    pub const fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    /// Wait between attempts.
    #[must_use]
    pub const fn retry_wait(&self) -> Duration {
        Duration::from_millis(self.retry_wait_ms)
    }

    /// Returns validation errors for this section.
    #[must_use]
    pub fn validation_errors(&self, path_prefix: &str) -> Vec<String> {
        let mut errors = Vec::new();
        if self.max_pending_async == 0 {
            errors.push(format!("{path_prefix}.max_pending_async must be greater than 0"));
        }
        // Semaphore permits are capped.
        if self.max_pending_async > MAX_PENDING_ASYNC_LIMIT {
            errors.push(format!(
                "{path_prefix}.max_pending_async must be at most {MAX_PENDING_ASYNC_LIMIT}"
            ));
        }
        if self.publish_timeout_ms == 0 {
            errors.push(format!("{path_prefix}.publish_timeout_ms must be greater than 0"));
        }
        errors
    }
}

/// Upper bound accepted for `max_pending_async`.
pub const MAX_PENDING_ASYNC_LIMIT: usize = u32::MAX as usize >> 3;

/// Behavior once the in-flight ceiling is reached.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PublishOnFullPolicy {
    /// Suspend the caller until a slot frees up.
    #[default]
    Block,
    /// Fail the publish immediately.
    FailFast,
}

const fn default_max_pending_async() -> usize {
    16_384
}

const fn default_publish_timeout_ms() -> u64 {
    5_000
}

const fn default_retry_attempts() -> u32 {
    2
}

const fn default_retry_wait_ms() -> u64 {
    250
}

#[cfg(test)]
mod tests {
    use super::{PublishOnFullPolicy, PublisherConfig};

    #[test]
    fn parses_publisher_section() {
        let config: PublisherConfig = serde_yaml::from_str(
            "max_pending_async: 8\non_full: fail_fast\ntrack_msg_id: true\n",
        )
        .expect("publisher section should parse");
        assert_eq!(config.max_pending_async, 8);
        assert_eq!(config.on_full, PublishOnFullPolicy::FailFast);
        assert!(config.track_msg_id);
        assert!(!config.ack_async);
        assert_eq!(config.retry_attempts, 2);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let parsed: Result<PublisherConfig, _> = serde_yaml::from_str("max_pending: 8\n");
        assert!(parsed.is_err());
    }

    #[test]
    fn zero_ceiling_is_rejected() {
        let config = PublisherConfig {
            max_pending_async: 0,
            ..PublisherConfig::default()
        };
        let errors = config.validation_errors("publisher");
        assert_eq!(errors, vec!["publisher.max_pending_async must be greater than 0"]);
    }
}
