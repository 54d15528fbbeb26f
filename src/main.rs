// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Runs two durable consumer groups against a publisher until interrupted.

use ackstream_config::{
    AppConfig, ConsumerConfig, Endpoint, Error as ConfigError, GroupName, SubjectFilter,
    SubscriptionSpec,
};
use ackstream_engine::{Ack, Connection, Envelope, FnHandler, Publisher, Subscriber, subject};
use clap::{Arg, ArgMatches, Command};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing_subscriber::EnvFilter;

const DEMO_FILTER: &str = "example_topic.>";
const DEMO_GROUPS: [&str; 2] = ["my-durable-example-1", "my-durable-example-2"];
const DEMO_WORKERS: usize = 4;
const DEMO_SUBJECTS: [(&str, &str); 4] = [
    ("example_topic.a", "hello from a"),
    ("example_topic.b", "hello from b"),
    ("example_topic.a.test", "hello from a.test"),
    ("example_topic.b.test", "hello from b.test"),
];

fn command() -> Command {
    Command::new(env!("CARGO_PKG_NAME"))
        .about("Publishes to example_topic.* and consumes it through durable groups")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .num_args(1)
                .help("YAML configuration file; built-in defaults are used when absent"),
        )
        .arg(
            Arg::new("url")
                .long("url")
                .env("ACKSTREAM_URL")
                .num_args(1)
                .help("Store endpoint, overrides connection.url"),
        )
        .arg(
            Arg::new("publish-interval-ms")
                .long("publish-interval-ms")
                .num_args(1)
                .value_parser(clap::value_parser!(u64))
                .default_value("1000")
                .help("Delay between two publish rounds"),
        )
        .arg(
            Arg::new("print-schema")
                .long("print-schema")
                .action(clap::ArgAction::SetTrue)
                .help("Print the JSON Schema of the configuration file and exit"),
        )
        .after_help(
            "Examples:\n  ackstream\n  ackstream --config configs/demo.yaml\n  ACKSTREAM_URL=memory://local ackstream --publish-interval-ms 200",
        )
}

fn load_config(matches: &ArgMatches) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::default(),
    };
    if let Some(url) = matches.get_one::<String>("url") {
        _ = Endpoint::parse(url).map_err(|error| ConfigError::InvalidUserConfig {
            error: format!("--url: {error}"),
        })?;
        config.connection.url.clone_from(url);
    }
    if config.subscriptions.is_empty() {
        for name in DEMO_GROUPS {
            config.subscriptions.push(SubscriptionSpec {
                filter: SubjectFilter::parse(DEMO_FILTER)?,
                consumer: ConsumerConfig::durable(GroupName::parse(name)?, DEMO_WORKERS),
            });
        }
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let matches = command().get_matches();
    if matches.get_flag("print-schema") {
        println!("{}", AppConfig::json_schema()?);
        return Ok(());
    }
    let config = load_config(&matches)?;
    let interval = Duration::from_millis(
        matches
            .get_one::<u64>("publish-interval-ms")
            .copied()
            .unwrap_or(1000),
    );

    let connection = Connection::connect(&config.connection, &config.stream).await?;
    let mut subscribers = Vec::with_capacity(config.subscriptions.len());
    for subscription in &config.subscriptions {
        let subscriber = Subscriber::new(&connection, subscription.consumer.clone());
        let monitor = subscriber
            .subscribe(&subscription.filter, Arc::new(FnHandler::new(log_message)))
            .await?;
        tracing::info!(group = %monitor.group(), filter = %monitor.filter(), "consumer ready");
        subscribers.push(subscriber);
    }

    let publisher = connection.publisher(config.publisher.clone())?;
    tokio::select! {
        () = shutdown_signal() => {}
        result = publish_forever(&publisher, interval) => result?,
    }

    for subscriber in &subscribers {
        subscriber.close().await;
    }
    if let Err(error) = publisher.shutdown().await {
        tracing::warn!(%error, "publisher did not flush cleanly");
    }
    let stats = publisher.stats();
    connection.close().await;
    tracing::info!(
        published = stats.published,
        failed = stats.failed,
        "shutdown complete"
    );
    Ok(())
}

async fn log_message(envelope: Envelope) -> Result<Ack, ackstream_engine::Nack> {
    tracing::info!(
        id = envelope.id(),
        subject = envelope.subject().map(|s| s.as_str()).unwrap_or("-"),
        payload = %String::from_utf8_lossy(envelope.payload()),
        "received"
    );
    Ok(Ack)
}

async fn publish_forever(
    publisher: &Publisher,
    interval: Duration,
) -> Result<(), ackstream_engine::Error> {
    let subjects = DEMO_SUBJECTS
        .iter()
        .map(|(raw, payload)| Ok((subject(raw)?, *payload)))
        .collect::<Result<Vec<_>, ackstream_engine::Error>>()?;
    let mut ticker = tokio::time::interval(interval);
    let mut round: u64 = 0;
    loop {
        _ = ticker.tick().await;
        round += 1;
        for (subject, payload) in &subjects {
            let envelope = Envelope::new(format!("{subject}-{round}"), payload.as_bytes().to_vec());
            let ack = publisher.publish(subject, envelope).await?;
            tracing::debug!(%subject, sequence = ack.sequence, "published");
        }
    }
}

/// Waits for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            tracing::error!(%error, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                _ = sig.recv().await;
            }
            Err(error) => tracing::error!(%error, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received SIGINT, shutting down"),
        () = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
