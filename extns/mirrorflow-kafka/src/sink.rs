use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use tracing::{error, info};

use crate::{Error, Result};

/// Default producer settings, anything in the user's producer config takes precedence.
const PRODUCER_DEFAULTS: &[(&str, &str)] = &[
    ("message.timeout.ms", "30000"),
    ("client.id", "mirrorflow-producer"),
];

/// How long `close` waits for outstanding deliveries.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq)]
pub struct KafkaSinkConfig {
    /// Any supported kafka producer configuration option.
    /// https://docs.confluent.io/platform/current/clients/librdkafka/html/md_CONFIGURATION.html
    pub properties: HashMap<String, String>,
}

/// A producer writing to the target cluster. The producer is safe to share between tasks.
pub struct KafkaSink {
    producer: FutureProducer,
    servers: String,
}

impl KafkaSink {
    pub fn new(config: KafkaSinkConfig) -> Result<Self> {
        let servers = crate::servers(&config.properties);
        let producer: FutureProducer =
            crate::client_config(&config.properties, PRODUCER_DEFAULTS, &[])
                .create()
                .map_err(|e| Error::Connection {
                    server: servers.clone(),
                    error: format!("Failed to create producer: {e}"),
                })?;
        Ok(Self { producer, servers })
    }

    /// Produces one record and waits for its delivery report. Waits for room if the local producer
    /// queue is full.
    pub async fn send(&self, topic: &str, key: Option<&Bytes>, payload: &Bytes) -> Result<()> {
        let mut record: FutureRecord<'_, [u8], [u8]> =
            FutureRecord::to(topic).payload(payload.as_ref());
        if let Some(key) = key {
            record = record.key(key.as_ref());
        }
        match self.producer.send(record, Timeout::Never).await {
            Ok(_) => Ok(()),
            Err((e, _)) => {
                error!(?e, topic, servers = %self.servers, "Sending payload to Kafka topic");
                Err(Error::Kafka(format!(
                    "Sending payload to kafka topic {topic}: {e:?}"
                )))
            }
        }
    }

    /// Flushes every outstanding delivery.
    pub async fn close(&self) -> Result<()> {
        let producer = self.producer.clone();
        // flush blocks the calling thread
        tokio::task::spawn_blocking(move || producer.flush(FLUSH_TIMEOUT))
            .await
            .map_err(|e| Error::Other(format!("Waiting for flush task to complete: {e:?}")))?
            .map_err(|e| Error::Kafka(format!("Failed to flush producer: {e}")))?;
        info!(servers = %self.servers, "Kafka producer flushed");
        Ok(())
    }
}
