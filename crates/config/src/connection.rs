// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Store connection settings.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default endpoint used when none is configured.
pub const DEFAULT_URL: &str = "memory://default";

/// How to reach the durable stream store.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ConnectionConfig {
    /// Store endpoint, `<scheme>://<name>`.
    #[serde(default = "default_url")]
    pub url: String,
    /// Keep retrying when the initial connect fails.
    #[serde(default = "default_retry_on_failed_connect")]
    pub retry_on_failed_connect: bool,
    /// Total time allowed for connecting, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Wait between two connect attempts, in milliseconds.
    #[serde(default = "default_reconnect_wait_ms")]
    pub reconnect_wait_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            retry_on_failed_connect: default_retry_on_failed_connect(),
            timeout_ms: default_timeout_ms(),
            reconnect_wait_ms: default_reconnect_wait_ms(),
        }
    }
}

impl ConnectionConfig {
    /// Total connect timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Wait between two connect attempts.
    #[must_use]
    pub const fn reconnect_wait(&self) -> Duration {
        Duration::from_millis(self.reconnect_wait_ms)
    }

    /// Parses the configured URL.
    pub fn endpoint(&self) -> Result<Endpoint, String> {
        Endpoint::parse(&self.url)
    }

    /// Returns validation errors for this section.
    #[must_use]
    pub fn validation_errors(&self, path_prefix: &str) -> Vec<String> {
        let mut errors = Vec::new();
        if let Err(error) = self.endpoint() {
            errors.push(format!("{path_prefix}.url: {error}"));
        }
        if self.timeout_ms == 0 {
            errors.push(format!("{path_prefix}.timeout_ms must be greater than 0"));
        }
        if self.retry_on_failed_connect && self.reconnect_wait_ms == 0 {
            errors.push(format!(
                "{path_prefix}.reconnect_wait_ms must be greater than 0 when retry_on_failed_connect is set"
            ));
        }
        errors
    }
}

/// A parsed `<scheme>://<name>` store endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Lowercased scheme, e.g. `memory`.
    pub scheme: String,
    /// Everything after `://`.
    pub name: String,
}

impl Endpoint {
    /// Parses an endpoint URL.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let Some((scheme, name)) = raw.split_once("://") else {
            return Err(format!("endpoint `{raw}` must have the form <scheme>://<name>"));
        };
        if scheme.is_empty() || !scheme.chars().all(|c| c.is_ascii_alphanumeric() || c == '+') {
            return Err(format!("endpoint `{raw}` has an invalid scheme"));
        }
        if name.is_empty() {
            return Err(format!("endpoint `{raw}` must name a store"));
        }
        Ok(Self {
            scheme: scheme.to_ascii_lowercase(),
            name: name.to_owned(),
        })
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}", self.scheme, self.name)
    }
}

fn default_url() -> String {
    DEFAULT_URL.to_owned()
}

const fn default_retry_on_failed_connect() -> bool {
    true
}

const fn default_timeout_ms() -> u64 {
    30_000
}

const fn default_reconnect_wait_ms() -> u64 {
    1_000
}
