//! Kafka clients used by mirrorflow: a consumer-group backed source that hands out several
//! independent streams, and a producer backed sink.

use std::collections::HashMap;

use rdkafka::config::{ClientConfig, RDKafkaLogLevel};
use tracing::info;

pub mod sink;
pub mod source;

pub use sink::{KafkaSink, KafkaSinkConfig};
pub use source::{KafkaMessage, KafkaSource, KafkaSourceConfig, KafkaStream, KafkaSubscription};

pub type Result<T> = core::result::Result<T, Error>;

#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    #[error("Connecting to Kafka {server} - {error}")]
    Connection { server: String, error: String },

    #[error("Kafka - {0}")]
    Kafka(String),

    #[error("{0}")]
    Other(String),
}

const BOOTSTRAP_SERVERS: &str = "bootstrap.servers";

/// Builds the librdkafka client config from user supplied properties. `defaults` are applied
/// first so that anything the user specified wins, `overrides` are applied last.
pub(crate) fn client_config(
    properties: &HashMap<String, String>,
    defaults: &[(&str, &str)],
    overrides: &[(&str, &str)],
) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    for (key, value) in defaults {
        client_config.set(*key, *value);
    }
    if !properties.is_empty() {
        info!(
            "Applying user-specified kafka config: {}",
            properties
                .iter()
                .filter(|(k, _)| !k.contains("password"))
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<String>>()
                .join(", ")
        );
        for (key, value) in properties {
            client_config.set(key, value);
        }
    }
    for (key, value) in overrides {
        client_config.set(*key, *value);
    }
    client_config.set_log_level(RDKafkaLogLevel::Warning);
    client_config
}

/// The broker list a client was configured with, used in error messages.
pub(crate) fn servers(properties: &HashMap<String, String>) -> String {
    properties
        .get(BOOTSTRAP_SERVERS)
        .cloned()
        .unwrap_or_else(|| "<unset>".to_string())
}
