// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors produced by the delivery engine.

use crate::store::StoreError;

/// Errors produced by engine operations.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// The store could not be reached within the connect policy.
    #[error("failed to connect to `{endpoint}` after {attempts} attempt(s): {reason}")]
    Connection {
        /// Endpoint that was dialed.
        endpoint: String,
        /// Number of connect attempts made.
        attempts: u32,
        /// Last failure.
        reason: String,
    },
    /// The endpoint scheme has no store implementation in this runtime.
    #[error("unsupported store endpoint `{endpoint}`: scheme `{scheme}` is not available")]
    UnsupportedEndpoint {
        /// Configured endpoint.
        endpoint: String,
        /// Rejected scheme.
        scheme: String,
    },
    /// The connection was closed.
    #[error("connection to `{endpoint}` is closed")]
    ConnectionClosed {
        /// Endpoint of the closed connection.
        endpoint: String,
    },
    /// A publish was rejected or failed after all retries.
    #[error("publish on `{subject}` failed: {reason}")]
    Publish {
        /// Target subject.
        subject: String,
        /// Failure details.
        reason: String,
    },
    /// A publish attempt did not complete in time.
    #[error("publish on `{subject}` timed out after {timeout_ms}ms")]
    PublishTimeout {
        /// Target subject.
        subject: String,
        /// Per-attempt timeout.
        timeout_ms: u64,
    },
    /// The in-flight publish ceiling is reached and the publisher fails fast.
    #[error("too many publishes in flight (max_pending_async = {max_pending})")]
    MaxPendingExceeded {
        /// Configured ceiling.
        max_pending: usize,
    },
    /// A subject or filter did not parse.
    #[error("invalid subject: {reason}")]
    InvalidSubject {
        /// Parser error.
        reason: String,
    },
    /// A configuration value is not usable for the requested operation.
    #[error("invalid configuration for {context}: {reason}")]
    InvalidConfig {
        /// What was being configured.
        context: String,
        /// Validation error details.
        reason: String,
    },
    /// The consumer group stopped while the caller was waiting on it.
    #[error("consumer group `{group}` on `{filter}` is closed")]
    GroupClosed {
        /// Group name.
        group: String,
        /// Subject filter.
        filter: String,
    },
    /// A store operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Internal synchronization failure.
    #[error("internal engine error: {message}")]
    Internal {
        /// Additional context.
        message: String,
    },
}

impl Error {
    /// Returns `true` for failures worth retrying.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::PublishTimeout { .. } | Self::Store(StoreError::Unavailable { .. })
        )
    }
}
