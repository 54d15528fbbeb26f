// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Configuration model for the ackstream delivery engine.
//!
//! A configuration document is YAML with four optional sections:
//!
//! ```yaml
//! connection:
//!   url: memory://default
//! stream:
//!   max_msgs: 100000
//! publisher:
//!   max_pending_async: 16384
//!   track_msg_id: true
//! subscriptions:
//!   - filter: example_topic.>
//!     consumer:
//!       durable: my-durable-example-1
//!       worker_count: 4
//! ```
//!
//! Every section has defaults and a `validation_errors(path_prefix)` method
//! returning human-readable errors prefixed with the path of the offending
//! field.

pub mod connection;
pub mod consumer;
pub mod error;
pub mod publisher;
pub mod stream;
pub mod subject;

pub use connection::{ConnectionConfig, Endpoint};
pub use consumer::{AckPolicy, ConsumerConfig, DeliverPolicy};
pub use error::Error;
pub use publisher::{PublishOnFullPolicy, PublisherConfig};
pub use stream::{DiscardPolicy, StreamConfig};
pub use subject::{GroupName, Subject, SubjectFilter};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A subscription declared in the configuration document.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SubscriptionSpec {
    /// Subjects selected by this subscription.
    pub filter: SubjectFilter,
    /// Consumer group settings.
    #[serde(default)]
    pub consumer: ConsumerConfig,
}

/// Root configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Store connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Stream retention settings.
    #[serde(default)]
    pub stream: StreamConfig,
    /// Publisher settings.
    #[serde(default)]
    pub publisher: PublisherConfig,
    /// Declared subscriptions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subscriptions: Vec<SubscriptionSpec>,
}

impl AppConfig {
    /// Parses and validates a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self, Error> {
        let config: Self = serde_yaml::from_str(yaml).map_err(|e| Error::Deserialize {
            details: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| Error::FileRead {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&yaml)
    }

    /// Fails with every validation error of the document.
    pub fn validate(&self) -> Result<(), Error> {
        let errors = self.validation_errors();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::InvalidConfiguration { errors })
        }
    }

    /// JSON Schema of the configuration document, pretty-printed.
    pub fn json_schema() -> Result<String, Error> {
        serde_json::to_string_pretty(&schemars::schema_for!(AppConfig)).map_err(|e| {
            Error::Serialize {
                details: e.to_string(),
            }
        })
    }

    /// Returns validation errors for the whole document.
    #[must_use]
    pub fn validation_errors(&self) -> Vec<String> {
        let mut errors = self.connection.validation_errors("connection");
        errors.extend(self.stream.validation_errors("stream"));
        errors.extend(self.publisher.validation_errors("publisher"));
        for (index, subscription) in self.subscriptions.iter().enumerate() {
            errors.extend(
                subscription
                    .consumer
                    .validation_errors(&format!("subscriptions[{index}].consumer")),
            );
        }
        errors
    }
}
