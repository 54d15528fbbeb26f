// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Asynchronous publisher with a bounded number of in-flight publishes.
//!
//! Publishes are enqueued to a single writer task in call order, so the store
//! assigns sequences in the order `publish_async` was called. Each enqueued
//! publish holds one semaphore permit until the store confirmed or rejected
//! it; the semaphore size is `max_pending_async`.

use crate::connection::Connection;
use crate::contract::MessagePublisher;
use crate::envelope::Envelope;
use crate::error::Error;
use crate::store::{AppendOptions, StreamStore, validate_publisher_support};
use ackstream_config::{PublishOnFullPolicy, PublisherConfig, Subject};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Store confirmation of one publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishAck {
    /// Sequence assigned by the store.
    pub sequence: u64,
    /// `true` when the message id was already stored and nothing was appended.
    pub duplicate: bool,
}

/// Asynchronous publish confirmation handle.
pub type PublishAckFuture = Pin<Box<dyn Future<Output = Result<PublishAck, Error>> + Send + 'static>>;

/// Publisher counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PublisherStats {
    /// Publishes confirmed by the store, duplicates included.
    pub published: u64,
    /// Publishes recognized as duplicates.
    pub duplicates: u64,
    /// Publishes that failed after all retries.
    pub failed: u64,
    /// Publishes currently awaiting confirmation.
    pub in_flight: usize,
}

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    duplicates: AtomicU64,
    failed: AtomicU64,
}

struct PublishRequest {
    subject: Subject,
    envelope: Envelope,
    reply: oneshot::Sender<Result<PublishAck, Error>>,
    _permit: OwnedSemaphorePermit,
}

struct PublisherInner {
    endpoint: String,
    config: PublisherConfig,
    permits: Arc<Semaphore>,
    requests: flume::Sender<PublishRequest>,
    counters: Arc<Counters>,
    closed: AtomicBool,
    shutdown: CancellationToken,
    writer: Mutex<Option<JoinHandle<()>>>,
}

/// Publisher handle. Clones share the in-flight ceiling and the writer task.
#[derive(Clone)]
pub struct Publisher {
    inner: Arc<PublisherInner>,
}

impl Publisher {
    /// Creates a publisher on `connection`.
    pub fn new(connection: &Connection, config: PublisherConfig) -> Result<Self, Error> {
        connection.ensure_open()?;
        let errors = config.validation_errors("publisher");
        if !errors.is_empty() {
            return Err(Error::InvalidConfig {
                context: "publisher".to_owned(),
                reason: errors.join("; "),
            });
        }
        validate_publisher_support(&config, connection.store().capabilities())?;

        let (requests, receiver) = flume::unbounded();
        let counters = Arc::new(Counters::default());
        let shutdown = connection.child_token();
        let writer = tokio::spawn(run_writer(
            connection.store().clone(),
            config.clone(),
            receiver,
            counters.clone(),
            shutdown.clone(),
        ));

        Ok(Self {
            inner: Arc::new(PublisherInner {
                endpoint: connection.endpoint().to_owned(),
                permits: Arc::new(Semaphore::new(config.max_pending_async)),
                config,
                requests,
                counters,
                closed: AtomicBool::new(false),
                shutdown,
                writer: Mutex::new(Some(writer)),
            }),
        })
    }

    /// Enqueues a publish and returns once it is accepted locally.
    ///
    /// Suspends at the in-flight ceiling with `on_full: block`, fails with
    /// [`Error::MaxPendingExceeded`] with `on_full: fail_fast`.
    pub async fn publish_async(
        &self,
        subject: &Subject,
        envelope: Envelope,
    ) -> Result<PublishAckFuture, Error> {
        self.ensure_open()?;
        let permit = match self.inner.config.on_full {
            PublishOnFullPolicy::Block => tokio::select! {
                biased;
                () = self.inner.shutdown.cancelled() => return Err(self.closed_error()),
                permit = self.inner.permits.clone().acquire_owned() => {
                    permit.map_err(|_| self.closed_error())?
                }
            },
            PublishOnFullPolicy::FailFast => {
                self.inner.permits.clone().try_acquire_owned().map_err(|_| {
                    Error::MaxPendingExceeded {
                        max_pending: self.inner.config.max_pending_async,
                    }
                })?
            }
        };

        let (reply, confirmation) = oneshot::channel();
        self.inner
            .requests
            .send(PublishRequest {
                subject: subject.clone(),
                envelope,
                reply,
                _permit: permit,
            })
            .map_err(|_| self.closed_error())?;

        let closed = self.closed_error();
        Ok(Box::pin(async move {
            confirmation.await.map_err(|_| closed)?
        }))
    }

    /// Publishes and waits for the store confirmation.
    pub async fn publish(&self, subject: &Subject, envelope: Envelope) -> Result<PublishAck, Error> {
        self.publish_async(subject, envelope).await?.await
    }

    /// Waits until every publish enqueued so far completed.
    pub async fn flush(&self) -> Result<(), Error> {
        let all = u32::try_from(self.inner.config.max_pending_async).map_err(|_| Error::Internal {
            message: "max_pending_async exceeds the semaphore range".to_owned(),
        })?;
        let _all_permits = self
            .inner
            .permits
            .acquire_many(all)
            .await
            .map_err(|_| self.closed_error())?;
        Ok(())
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> PublisherStats {
        let counters = &self.inner.counters;
        PublisherStats {
            published: counters.published.load(Ordering::Relaxed),
            duplicates: counters.duplicates.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            in_flight: self.inner.config.max_pending_async - self.inner.permits.available_permits(),
        }
    }

    /// Stops accepting publishes, waits for in-flight ones and stops the writer.
    pub async fn shutdown(&self) -> Result<(), Error> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let flushed = if self.inner.shutdown.is_cancelled() {
            Ok(())
        } else {
            self.flush().await
        };
        self.inner.shutdown.cancel();
        let writer = self.inner.writer.lock().take();
        if let Some(writer) = writer {
            writer.await.map_err(|error| Error::Internal {
                message: format!("publisher writer task failed: {error}"),
            })?;
        }
        flushed
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.inner.closed.load(Ordering::Acquire) || self.inner.shutdown.is_cancelled() {
            Err(self.closed_error())
        } else {
            Ok(())
        }
    }

    fn closed_error(&self) -> Error {
        Error::ConnectionClosed {
            endpoint: self.inner.endpoint.clone(),
        }
    }
}

#[async_trait]
impl MessagePublisher for Publisher {
    async fn publish(&self, subject: &Subject, envelope: Envelope) -> Result<(), Error> {
        let confirmation = self.publish_async(subject, envelope).await?;
        if self.inner.config.ack_async {
            // The writer logs and counts failures.
            drop(confirmation);
            return Ok(());
        }
        _ = confirmation.await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), Error> {
        self.shutdown().await
    }
}

async fn run_writer(
    store: Arc<dyn StreamStore>,
    config: PublisherConfig,
    requests: flume::Receiver<PublishRequest>,
    counters: Arc<Counters>,
    shutdown: CancellationToken,
) {
    loop {
        let request = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            request = requests.recv_async() => match request {
                Ok(request) => request,
                Err(_) => break,
            },
        };

        let result = append_with_retry(&*store, &config, &request.subject, request.envelope.clone()).await;
        match &result {
            Ok(ack) => {
                _ = counters.published.fetch_add(1, Ordering::Relaxed);
                if ack.duplicate {
                    _ = counters.duplicates.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(
                        subject = %request.subject,
                        id = request.envelope.id(),
                        sequence = ack.sequence,
                        "duplicate publish"
                    );
                }
            }
            Err(error) => {
                _ = counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    subject = %request.subject,
                    id = request.envelope.id(),
                    %error,
                    "publish failed"
                );
            }
        }
        let _ignore_closed = request.reply.send(result);
    }
}

async fn append_with_retry(
    store: &dyn StreamStore,
    config: &PublisherConfig,
    subject: &Subject,
    envelope: Envelope,
) -> Result<PublishAck, Error> {
    let options = AppendOptions {
        dedup_id: config.track_msg_id.then(|| Arc::from(envelope.id())),
    };
    let mut attempt = 0;
    loop {
        let result = match tokio::time::timeout(
            config.publish_timeout(),
            store.append(subject, envelope.clone(), options.clone()),
        )
        .await
        {
            Ok(appended) => appended.map_err(Error::from),
            Err(_) => Err(Error::PublishTimeout {
                subject: subject.to_string(),
                timeout_ms: config.publish_timeout_ms,
            }),
        };

        match result {
            Ok(ack) => {
                return Ok(PublishAck {
                    sequence: ack.sequence,
                    duplicate: ack.duplicate,
                });
            }
            Err(error) if error.is_transient() && attempt < config.retry_attempts => {
                attempt += 1;
                tracing::warn!(subject = %subject, attempt, %error, "publish attempt failed, retrying");
                tokio::time::sleep(config.retry_wait()).await;
            }
            Err(Error::Store(error)) => {
                return Err(Error::Publish {
                    subject: subject.to_string(),
                    reason: error.to_string(),
                });
            }
            Err(error) => return Err(error),
        }
    }
}
