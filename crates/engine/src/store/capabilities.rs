// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

use crate::error::Error;
use ackstream_config::{ConsumerConfig, DeliverPolicy, PublisherConfig};

/// Optional features a store backend may provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreCapabilities {
    /// Backend identifier.
    pub backend_name: &'static str,
    /// Support for publish deduplication by message id.
    pub supports_dedup: bool,
    /// Support for `deliver_policy: by_start_time`.
    pub supports_start_time: bool,
}

pub(crate) fn validate_publisher_support(
    config: &PublisherConfig,
    capabilities: StoreCapabilities,
) -> Result<(), Error> {
    if config.track_msg_id && !capabilities.supports_dedup {
        return Err(unsupported(capabilities, "track_msg_id", "true"));
    }
    Ok(())
}

pub(crate) fn validate_consumer_support(
    config: &ConsumerConfig,
    capabilities: StoreCapabilities,
) -> Result<(), Error> {
    if config.deliver_policy == DeliverPolicy::ByStartTime && !capabilities.supports_start_time {
        return Err(unsupported(capabilities, "deliver_policy", "by_start_time"));
    }
    Ok(())
}

fn unsupported(capabilities: StoreCapabilities, policy: &str, value: &str) -> Error {
    Error::InvalidConfig {
        context: format!("store backend `{}`", capabilities.backend_name),
        reason: format!("`{policy}={value}` is not supported"),
    }
}

#[cfg(test)]
mod tests {
    use super::{StoreCapabilities, validate_consumer_support, validate_publisher_support};
    use ackstream_config::{ConsumerConfig, DeliverPolicy, PublisherConfig};

    const BARE: StoreCapabilities = StoreCapabilities {
        backend_name: "bare",
        supports_dedup: false,
        supports_start_time: false,
    };

    #[test]
    fn rejects_features_the_backend_lacks() {
        let publisher = PublisherConfig {
            track_msg_id: true,
            ..PublisherConfig::default()
        };
        let err = validate_publisher_support(&publisher, BARE).expect_err("dedup unsupported");
        assert!(err.to_string().contains("track_msg_id"));

        let consumer = ConsumerConfig {
            deliver_policy: DeliverPolicy::ByStartTime,
            start_time_ms: Some(0),
            ..ConsumerConfig::default()
        };
        assert!(validate_consumer_support(&consumer, BARE).is_err());
        assert!(validate_consumer_support(&ConsumerConfig::default(), BARE).is_ok());
    }
}
