// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

use crate::envelope::Envelope;
use crate::error::Error;
use ackstream_config::Subject;
use async_trait::async_trait;
use std::future::Future;

/// Positive handler outcome: the message is consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Ack;

/// Negative handler outcome: the message should be redelivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nack {
    /// Human-readable reason, logged with the redelivery.
    pub reason: String,
}

impl Nack {
    /// Builds a nack with a reason.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for Nack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.reason)
    }
}

/// Caller-supplied message processing.
///
/// Returning `Ok(Ack)` acknowledges the delivery, `Err(Nack)` requests a
/// redelivery. A panic sends no signal: the delivery stays pending until its
/// ack deadline passes.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Processes one delivered envelope.
    async fn handle(&self, envelope: &Envelope) -> Result<Ack, Nack>;
}

/// Adapts an async closure into a [`MessageHandler`].
pub struct FnHandler<F>(pub F);

impl<F> FnHandler<F> {
    /// Wraps `handler`.
    pub fn new<Fut>(handler: F) -> Self
    where
        F: Fn(Envelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Ack, Nack>> + Send + 'static,
    {
        Self(handler)
    }
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Ack, Nack>> + Send + 'static,
{
    async fn handle(&self, envelope: &Envelope) -> Result<Ack, Nack> {
        (self.0)(envelope.clone()).await
    }
}

/// Publisher-side API.
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    /// Publishes one envelope on `subject`.
    async fn publish(&self, subject: &Subject, envelope: Envelope) -> Result<(), Error>;

    /// Waits for in-flight publishes and stops accepting new ones.
    async fn close(&self) -> Result<(), Error>;
}
