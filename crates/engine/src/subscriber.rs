// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Caller-facing subscription API.

use crate::connection::Connection;
use crate::consumer::{GroupMonitor, WorkerId};
use crate::contract::MessageHandler;
use crate::dispatch::WorkerPool;
use crate::error::Error;
use ackstream_config::{ConsumerConfig, GroupName, SubjectFilter};
use parking_lot::Mutex;
use std::sync::Arc;

/// Opens subscriptions sharing one consumer configuration.
pub struct Subscriber {
    connection: Connection,
    config: ConsumerConfig,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl Subscriber {
    /// Creates a subscriber; the configuration is validated on each subscribe.
    #[must_use]
    pub fn new(connection: &Connection, config: ConsumerConfig) -> Self {
        Self {
            connection: connection.clone(),
            config,
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Consumer configuration of this subscriber.
    #[must_use]
    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Joins the consumer group for `filter` and starts `worker_count`
    /// dispatch loops running `handler`.
    ///
    /// The returned monitor observes the group; the subscription itself is
    /// owned by this subscriber and stopped by [`Subscriber::close`].
    pub async fn subscribe(
        &self,
        filter: &SubjectFilter,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<GroupMonitor, Error> {
        let subscription = Subscription::open(&self.connection, filter, self.config.clone(), handler).await?;
        let monitor = subscription.monitor().clone();
        self.subscriptions.lock().push(subscription);
        Ok(monitor)
    }

    /// Stops every subscription opened by this subscriber.
    pub async fn close(&self) {
        let subscriptions = std::mem::take(&mut *self.subscriptions.lock());
        for subscription in subscriptions {
            subscription.close().await;
        }
    }
}

/// A running subscription: one group membership plus its worker pool.
pub struct Subscription {
    connection: Connection,
    group: GroupName,
    filter: SubjectFilter,
    workers: Vec<WorkerId>,
    pool: WorkerPool,
    monitor: GroupMonitor,
    config: ConsumerConfig,
}

impl Subscription {
    /// Joins the group and starts its dispatch loops.
    pub async fn open(
        connection: &Connection,
        filter: &SubjectFilter,
        config: ConsumerConfig,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Self, Error> {
        connection.ensure_open()?;
        let membership = connection.coordinator().join(filter, config.clone()).await?;
        let workers = membership.worker_ids();
        let pool = WorkerPool::spawn(membership.workers, handler, connection.child_token());
        tracing::info!(
            group = %membership.group,
            filter = %filter,
            workers = pool.len(),
            "subscribed"
        );
        Ok(Self {
            connection: connection.clone(),
            group: membership.group,
            filter: filter.clone(),
            workers,
            pool,
            monitor: membership.monitor,
            config,
        })
    }

    /// Group name, generated for ephemeral subscriptions.
    #[must_use]
    pub fn group(&self) -> &GroupName {
        &self.group
    }

    /// Subject filter.
    #[must_use]
    pub fn filter(&self) -> &SubjectFilter {
        &self.filter
    }

    /// Progress view of the group.
    #[must_use]
    pub fn monitor(&self) -> &GroupMonitor {
        &self.monitor
    }

    /// Stops new deliveries, waits for in-flight handlers up to the close
    /// timeout, then leaves the group.
    pub async fn close(self) {
        let aborted = self.pool.shutdown(self.config.close_timeout()).await;
        for worker in &self.workers {
            self.connection.coordinator().leave(worker).await;
        }
        tracing::info!(
            group = %self.group,
            filter = %self.filter,
            aborted,
            "subscription closed"
        );
    }
}
