// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Explicitly owned store connection.

use crate::consumer::ConsumerGroupCoordinator;
use crate::error::Error;
use crate::publisher::Publisher;
use crate::store::{InMemoryStore, StreamStore};
use ackstream_config::{ConnectionConfig, PublisherConfig, StreamConfig};
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const MEMORY_SCHEME: &str = "memory";

struct ConnectionInner {
    endpoint: String,
    store: Arc<dyn StreamStore>,
    coordinator: ConsumerGroupCoordinator,
    shutdown: CancellationToken,
}

/// Handle on an open store connection. Clones share the connection.
///
/// Closing the connection stops every consumer group and publisher created
/// from it.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Resolves `config.url` to a store backend and opens it.
    ///
    /// Only `memory://<name>` is available in this runtime.
    pub async fn connect(config: &ConnectionConfig, stream: &StreamConfig) -> Result<Self, Error> {
        let endpoint = config.endpoint().map_err(|reason| Error::InvalidConfig {
            context: "connection.url".to_owned(),
            reason,
        })?;
        if endpoint.scheme != MEMORY_SCHEME {
            return Err(Error::UnsupportedEndpoint {
                endpoint: config.url.clone(),
                scheme: endpoint.scheme,
            });
        }
        let store = InMemoryStore::shared(&endpoint.name, stream);
        Self::open(config, store).await
    }

    /// Opens a connection on an existing store, retrying per `config`.
    pub async fn open(config: &ConnectionConfig, store: Arc<dyn StreamStore>) -> Result<Self, Error> {
        let endpoint = config.url.clone();
        let deadline = Instant::now() + config.timeout();
        let mut attempts = 0;
        loop {
            attempts += 1;
            let reason = match tokio::time::timeout_at(deadline, store.ping()).await {
                Ok(Ok(())) => break,
                Ok(Err(error)) => error.to_string(),
                Err(_) => "connect timed out".to_owned(),
            };
            if !config.retry_on_failed_connect || Instant::now() + config.reconnect_wait() > deadline
            {
                return Err(Error::Connection {
                    endpoint,
                    attempts,
                    reason,
                });
            }
            tracing::warn!(
                endpoint = %endpoint,
                attempt = attempts,
                reason = %reason,
                "store unreachable, retrying"
            );
            tokio::time::sleep(config.reconnect_wait()).await;
        }

        tracing::info!(endpoint = %endpoint, attempts, "connected");
        let shutdown = CancellationToken::new();
        Ok(Self {
            inner: Arc::new(ConnectionInner {
                coordinator: ConsumerGroupCoordinator::new(
                    endpoint.clone(),
                    store.clone(),
                    shutdown.child_token(),
                ),
                endpoint,
                store,
                shutdown,
            }),
        })
    }

    /// Creates a publisher on this connection.
    pub fn publisher(&self, config: PublisherConfig) -> Result<Publisher, Error> {
        Publisher::new(self, config)
    }

    /// Stops every consumer group and publisher of this connection.
    pub async fn close(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        self.inner.coordinator.close().await;
        self.inner.shutdown.cancel();
        tracing::info!(endpoint = %self.inner.endpoint, "connection closed");
    }

    /// Returns `true` once [`Connection::close`] ran.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Fails with [`Error::ConnectionClosed`] once the connection is closed.
    pub fn ensure_open(&self) -> Result<(), Error> {
        if self.is_closed() {
            Err(Error::ConnectionClosed {
                endpoint: self.inner.endpoint.clone(),
            })
        } else {
            Ok(())
        }
    }

    /// Configured endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    /// Underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn StreamStore> {
        &self.inner.store
    }

    /// Consumer group coordinator of this connection.
    #[must_use]
    pub fn coordinator(&self) -> &ConsumerGroupCoordinator {
        &self.inner.coordinator
    }

    pub(crate) fn child_token(&self) -> CancellationToken {
        self.inner.shutdown.child_token()
    }
}

#[cfg(test)]
mod tests {
    use super::Connection;
    use crate::error::Error;
    use crate::store::{InMemoryStore, StreamStore};
    use ackstream_config::{ConnectionConfig, StreamConfig};
    use std::sync::Arc;
    use std::time::Duration;

    fn config(url: &str, retry: bool) -> ConnectionConfig {
        ConnectionConfig {
            url: url.to_owned(),
            retry_on_failed_connect: retry,
            timeout_ms: 5_000,
            reconnect_wait_ms: 1_000,
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn memory_scheme_connects() {
        let connection = Connection::connect(&config("memory://conn-test", false), &StreamConfig::default())
            .await
            .expect("memory endpoint should connect");
        assert!(!connection.is_closed());
        assert!(connection.ensure_open().is_ok());
        connection.close().await;
        assert!(matches!(
            connection.ensure_open(),
            Err(Error::ConnectionClosed { .. })
        ));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn unknown_scheme_is_rejected() {
        let result = Connection::connect(&config("nats://127.0.0.1:4222", true), &StreamConfig::default()).await;
        assert!(matches!(
            result,
            Err(Error::UnsupportedEndpoint { ref scheme, .. }) if scheme == "nats"
        ));
    }

    /// Scenario:
    /// 1. Given an unreachable store and a 5s connect timeout with 1s waits.
    /// 2. When connecting with retries enabled.
    /// 3. Then the connection fails after several attempts.
    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn retries_until_timeout() {
        let store = Arc::new(InMemoryStore::new("down", StreamConfig::default()));
        store.set_reachable(false);
        let err = Connection::open(&config("memory://down", true), store)
            .await
            .err()
            .expect("unreachable store should fail");
        match err {
            Error::Connection { attempts, .. } => assert!(attempts >= 4, "attempts = {attempts}"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn no_retry_fails_on_first_attempt() {
        let store = Arc::new(InMemoryStore::new("down", StreamConfig::default()));
        store.set_reachable(false);
        let err = Connection::open(&config("memory://down", false), store)
            .await
            .err()
            .expect("unreachable store should fail");
        assert!(matches!(err, Error::Connection { attempts: 1, .. }));
    }

    /// Scenario:
    /// 1. Given a store that comes back 2.5s after the first connect attempt.
    /// 2. When connecting with retries enabled.
    /// 3. Then the connection succeeds.
    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn connects_once_store_recovers() {
        let store = Arc::new(InMemoryStore::new("flaky", StreamConfig::default()));
        store.set_reachable(false);
        let recovering = store.clone();
        let _recovery = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2_500)).await;
            recovering.set_reachable(true);
        });
        let dyn_store: Arc<dyn StreamStore> = store;
        let connection = Connection::open(&config("memory://flaky", true), dyn_store)
            .await
            .expect("store should recover within the timeout");
        assert!(!connection.is_closed());
    }
}
