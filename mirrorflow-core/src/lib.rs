//! Mirrors topics from one or more source Kafka clusters to a target cluster.
//!
//! Every source cluster is read through a number of consumer streams, each drained by a reader
//! worker. Keyed records are written by the reader itself to the producer of the sender slot their
//! key hashes to, which keeps them in order per key. Unkeyed records go through a bounded channel
//! shared by all the sender workers, which balances them over the producers.

use std::future::Future;
use std::net::SocketAddr;

use tracing::{error, info};

pub use self::error::{Error, Result};

mod error;

/// Configuration of the relay, the topic filter and the client properties.
pub mod config;

/// Starts, watches and shuts down the worker sets.
pub mod coordinator;
pub use crate::coordinator::Coordinator;

pub mod message;
pub use crate::message::Record;

/// Prometheus metrics and the HTTP endpoint serving them.
pub mod metrics;

/// Where records come from.
pub mod source;

/// Where records go.
pub mod sink;

pub mod shared;

mod channel;
mod latch;
mod reader;
mod router;
mod sender;

use crate::config::Settings;
use crate::sink::{Sink, SinkClient};
use crate::source::kafka::KafkaConnector;

/// Runs the mirror described by `settings` until `shutdown` resolves, every reader has exited, or,
/// with the fail fast policy, a worker fails.
pub async fn run(settings: Settings, shutdown: impl Future<Output = ()>) -> Result<()> {
    settings.validate()?;

    if let Some(port) = settings.metrics_port {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        tokio::spawn(async move {
            if let Err(e) = metrics::start_metrics_server(addr).await {
                error!(?e, "Metrics server stopped");
            }
        });
    }

    let sinks = sink::create_sinks(settings.relay.num_senders, |slot| {
        SinkClient::new(settings.sink_type, &settings.sink_config, slot)
    })
    .await?;

    let connectors = match settings
        .source_configs
        .into_iter()
        .map(|properties| {
            KafkaConnector::new(properties, settings.topic_filter.clone())
                .map_err(|e| Error::StreamCreation(e.to_string()))
        })
        .collect::<Result<Vec<_>>>()
    {
        Ok(connectors) => connectors,
        Err(e) => {
            for sink in &sinks {
                if let Err(e) = sink.close().await {
                    error!(?e, "Failed to close sink");
                }
            }
            return Err(e);
        }
    };

    info!(
        sources = connectors.len(),
        senders = sinks.len(),
        sink = %settings.sink_type,
        filter = ?settings.topic_filter,
        "Starting mirror"
    );
    let coordinator = Coordinator::start(settings.relay, connectors, sinks).await?;
    coordinator.run_until(shutdown).await;
    Ok(())
}
