use std::sync::Arc;

use mirrorflow_kafka::{KafkaSink, KafkaSinkConfig};
use tracing::error;

use crate::config::{Properties, SinkType};
use crate::error::{Error, Result};
use crate::message::Record;

/// Produces to the target Kafka cluster.
mod kafka;

/// Logs the records, used for dry runs.
mod log;

pub use log::LogSink;

/// A sink client. `send` may be called concurrently: by the sender worker that owns the client and
/// by every reader worker that routes a keyed record to it.
#[trait_variant::make(Sink: Send)]
pub trait LocalSink {
    /// Writes one record. An error is unrecoverable for the caller.
    async fn send(&self, record: &Record) -> Result<()>;

    /// Releases the client, called exactly once per sender slot.
    async fn close(&self) -> Result<()>;
}

/// The sink clients the relay can be configured with.
pub enum SinkClient {
    Kafka(KafkaSink),
    Log(LogSink),
}

impl SinkClient {
    pub fn new(sink_type: SinkType, properties: &Properties, slot: usize) -> Result<Self> {
        match sink_type {
            SinkType::Kafka => {
                let mut properties = properties.clone();
                // each slot is its own producer, give them distinct names in the broker logs
                if let Some(client_id) = properties.get_mut("client.id") {
                    client_id.push_str(&format!("-{slot}"));
                }
                let sink = KafkaSink::new(KafkaSinkConfig { properties })
                    .map_err(|e| Error::Sink(e.to_string()))?;
                Ok(SinkClient::Kafka(sink))
            }
            SinkType::Log => Ok(SinkClient::Log(LogSink::new(slot))),
        }
    }
}

impl Sink for SinkClient {
    async fn send(&self, record: &Record) -> Result<()> {
        match self {
            SinkClient::Kafka(sink) => Sink::send(sink, record).await,
            SinkClient::Log(sink) => Sink::send(sink, record).await,
        }
    }

    async fn close(&self) -> Result<()> {
        match self {
            SinkClient::Kafka(sink) => Sink::close(sink).await,
            SinkClient::Log(sink) => Sink::close(sink).await,
        }
    }
}

/// Creates one sink per sender slot. If any of them cannot be created, the ones already created
/// are closed before the error is returned.
pub(crate) async fn create_sinks<K, F>(count: usize, create: F) -> Result<Vec<K>>
where
    K: Sink,
    F: Fn(usize) -> Result<K>,
{
    let mut sinks = Vec::with_capacity(count);
    for slot in 0..count {
        match create(slot) {
            Ok(sink) => sinks.push(sink),
            Err(e) => {
                error!(slot, ?e, "Failed to create sink");
                for (slot, sink) in sinks.iter().enumerate() {
                    if let Err(e) = Sink::close(sink).await {
                        error!(slot, ?e, "Failed to close sink");
                    }
                }
                return Err(e);
            }
        }
    }
    Ok(sinks)
}

/// One configured output worker identity and the sink client it owns.
pub(crate) struct SinkSlot<K> {
    pub(crate) id: usize,
    pub(crate) sink: Arc<K>,
}

impl<K> SinkSlot<K> {
    pub(crate) fn new(id: usize, sink: K) -> Self {
        Self {
            id,
            sink: Arc::new(sink),
        }
    }
}

impl<K> Clone for SinkSlot<K> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            sink: Arc::clone(&self.sink),
        }
    }
}
