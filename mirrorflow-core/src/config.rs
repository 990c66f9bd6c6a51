use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

/// Inclusion and exclusion filters over topic names.
pub mod filter;

pub use filter::TopicFilter;

/// Client properties, passed as they are to the Kafka clients.
pub type Properties = HashMap<String, String>;

const DEFAULT_NUM_SENDERS: usize = 1;
const DEFAULT_NUM_STREAMS: usize = 1;
const DEFAULT_CHANNEL_CAPACITY: usize = 10000;
const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// What the coordinator does when a worker hits a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Keep the rest of the pipeline running in a degraded state until shutdown is triggered from
    /// outside.
    #[default]
    Continue,
    /// Run the shutdown sequence as soon as any worker fails.
    Shutdown,
}

/// Sizing and behavior of the relay itself.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Number of sender slots, each owning one sink client.
    pub num_senders: usize,
    /// Number of streams (and reader workers) derived from every source connector.
    pub num_streams: usize,
    /// Capacity of the shared relay channel.
    pub channel_capacity: usize,
    pub on_failure: FailurePolicy,
    /// Upper bound for every wait of the shutdown sequence. When it elapses the stuck workers are
    /// abandoned and their in-flight records may be lost.
    pub drain_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            num_senders: DEFAULT_NUM_SENDERS,
            num_streams: DEFAULT_NUM_STREAMS,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            on_failure: FailurePolicy::default(),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }
}

impl RelayConfig {
    pub fn validate(&self) -> Result<()> {
        if self.num_senders == 0 {
            return Err(Error::Config(
                "the number of senders must be at least 1".to_string(),
            ));
        }
        if self.num_streams == 0 {
            return Err(Error::Config(
                "the number of streams must be at least 1".to_string(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(Error::Config(
                "the queue size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SinkType {
    #[default]
    Kafka,
    /// Logs every record instead of producing it, useful to check a filter.
    Log,
}

impl FromStr for SinkType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "kafka" => Ok(SinkType::Kafka),
            "log" => Ok(SinkType::Log),
            other => Err(Error::Config(format!("unknown sink type {other:?}"))),
        }
    }
}

impl fmt::Display for SinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkType::Kafka => write!(f, "kafka"),
            SinkType::Log => write!(f, "log"),
        }
    }
}

/// Everything needed to run the mirror.
#[derive(Debug, Clone)]
pub struct Settings {
    pub relay: RelayConfig,
    pub topic_filter: TopicFilter,
    /// One consumer config per source cluster.
    pub source_configs: Vec<Properties>,
    pub sink_config: Properties,
    pub sink_type: SinkType,
    /// Serve `/metrics` and `/livez` on this port.
    pub metrics_port: Option<u16>,
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        self.relay.validate()?;
        if self.source_configs.is_empty() {
            return Err(Error::Config(
                "at least one consumer config is required".to_string(),
            ));
        }
        Ok(())
    }
}

/// Reads a `key=value` properties file. `#` and `!` start comment lines and `:` is accepted as a
/// separator.
pub fn load_properties(path: impl AsRef<Path>) -> Result<Properties> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("reading {}: {e}", path.display())))?;
    parse_properties(&content)
        .map_err(|e| Error::Config(format!("parsing {}: {e}", path.display())))
}

fn parse_properties(content: &str) -> std::result::Result<Properties, String> {
    let mut properties = Properties::new();
    for (number, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }
        let Some((key, value)) = line.split_once(['=', ':']) else {
            return Err(format!("line {}: expected key=value", number + 1));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("line {}: empty key", number + 1));
        }
        properties.insert(key.to_string(), value.trim().to_string());
    }
    Ok(properties)
}
