// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Durable, acknowledgment-based publish/subscribe delivery engine.
//!
//! Delivery is at-least-once: a message is consumed only once a worker of
//! its consumer group acknowledges it. Rejections and missed ack deadlines
//! trigger redeliveries, bounded by `max_deliver`.
//!
//! ```text
//!   Publisher ──▶ StreamStore ──▶ consumer group ──▶ WorkerQueue × N ──▶ MessageHandler
//!                     ▲                 │                                    │
//!                     └── cursor ◀── DeliveryTracker ◀──── ack / nack ───────┘
//! ```
//!
//! Typical use:
//!
//! ```no_run
//! # use ackstream_engine::{Ack, Connection, Envelope, FnHandler, Subscriber};
//! # use ackstream_config::{AppConfig, ConsumerConfig, GroupName, Subject, SubjectFilter};
//! # use std::sync::Arc;
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::default();
//! let connection = Connection::connect(&config.connection, &config.stream).await?;
//! let subscriber = Subscriber::new(
//!     &connection,
//!     ConsumerConfig::durable(GroupName::parse("workers")?, 4),
//! );
//! let _monitor = subscriber
//!     .subscribe(
//!         &SubjectFilter::parse("example_topic.>")?,
//!         Arc::new(FnHandler::new(|_envelope| async { Ok(Ack) })),
//!     )
//!     .await?;
//! let publisher = connection.publisher(config.publisher)?;
//! let _ack = publisher
//!     .publish(&Subject::parse("example_topic.a")?, Envelope::new("1", b"hello".to_vec()))
//!     .await?;
//! subscriber.close().await;
//! connection.close().await;
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod consumer;
pub mod contract;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod publisher;
pub mod store;
pub mod subscriber;

pub use connection::Connection;
pub use consumer::{
    AckOutcome, ConsumerGroupCoordinator, DeadLetter, Delivery, DeliveryToken, GroupMembership,
    GroupMonitor, WorkerId, WorkerQueue,
};
pub use contract::{Ack, FnHandler, MessageHandler, MessagePublisher, Nack};
pub use dispatch::{WorkerPool, run_dispatch_loop};
pub use envelope::Envelope;
pub use error::Error;
pub use publisher::{PublishAck, PublishAckFuture, Publisher, PublisherStats};
pub use store::{InMemoryStore, StoreError, StreamStore};
pub use subscriber::{Subscriber, Subscription};

/// Parses a concrete subject.
pub fn subject(raw: &str) -> Result<ackstream_config::Subject, Error> {
    ackstream_config::Subject::parse(raw).map_err(|reason| Error::InvalidSubject { reason })
}

/// Parses a subject filter.
pub fn filter(raw: &str) -> Result<ackstream_config::SubjectFilter, Error> {
    ackstream_config::SubjectFilter::parse(raw).map_err(|reason| Error::InvalidSubject { reason })
}
