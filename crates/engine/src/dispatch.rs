// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Worker loops binding a handler to a consumer group.

use crate::consumer::{AckOutcome, WorkerId, WorkerQueue};
use crate::contract::MessageHandler;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Pulls deliveries from `queue` until `shutdown` fires or the queue closes.
///
/// `Ok` acks, `Err` nacks. A panicking handler sends nothing, so the message
/// is redelivered once its ack deadline passes.
pub async fn run_dispatch_loop(
    mut queue: WorkerQueue,
    handler: Arc<dyn MessageHandler>,
    shutdown: CancellationToken,
) {
    let worker = queue.id().clone();
    loop {
        let delivery = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            delivery = queue.recv() => match delivery {
                Some(delivery) => delivery,
                None => break,
            },
        };

        let sequence = delivery.token().sequence;
        let delivery_count = delivery.delivery_count();
        tracing::debug!(worker = %worker, sequence, delivery_count, "dispatching");

        let result = AssertUnwindSafe(handler.handle(delivery.envelope()))
            .catch_unwind()
            .await;
        let outcome = match result {
            Ok(Ok(_ack)) => delivery.ack(),
            Ok(Err(nack)) => delivery.nack_with_reason(&nack.reason),
            Err(_panic) => {
                tracing::error!(
                    worker = %worker,
                    sequence,
                    delivery_count,
                    "handler panicked, leaving message for redelivery"
                );
                continue;
            }
        };
        if matches!(outcome, AckOutcome::Stale | AckOutcome::AlreadyTerminal) {
            tracing::debug!(worker = %worker, sequence, ?outcome, "handler outcome had no effect");
        }
    }
    tracing::debug!(worker = %worker, "dispatch loop stopped");
}

/// The dispatch loops of one subscription.
pub struct WorkerPool {
    workers: Vec<(WorkerId, JoinHandle<()>)>,
    shutdown: CancellationToken,
}

impl WorkerPool {
    /// Spawns one dispatch loop per queue.
    #[must_use]
    pub fn spawn(
        queues: Vec<WorkerQueue>,
        handler: Arc<dyn MessageHandler>,
        shutdown: CancellationToken,
    ) -> Self {
        let workers = queues
            .into_iter()
            .map(|queue| {
                let id = queue.id().clone();
                let task = tokio::spawn(run_dispatch_loop(
                    queue,
                    handler.clone(),
                    shutdown.clone(),
                ));
                (id, task)
            })
            .collect();
        Self { workers, shutdown }
    }

    /// Identities of the pooled workers.
    #[must_use]
    pub fn worker_ids(&self) -> Vec<WorkerId> {
        self.workers.iter().map(|(id, _)| id.clone()).collect()
    }

    /// Number of pooled workers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Returns `true` for a pool without workers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Stops pulling new deliveries and waits up to `close_timeout` for
    /// in-flight handlers. Stragglers are aborted and their deliveries stay
    /// pending.
    ///
    /// Returns the number of aborted workers.
    pub async fn shutdown(self, close_timeout: Duration) -> usize {
        self.shutdown.cancel();
        let deadline = tokio::time::Instant::now() + close_timeout;
        let mut aborted = 0;
        for (id, mut task) in self.workers {
            match tokio::time::timeout_at(deadline, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    tracing::error!(worker = %id, %error, "dispatch loop failed");
                }
                Err(_) => {
                    tracing::warn!(worker = %id, "handler still running at close timeout, aborting");
                    task.abort();
                    aborted += 1;
                }
            }
        }
        aborted
    }
}
