use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use rdkafka::client::ClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::stream_consumer::StreamConsumer;
use rdkafka::consumer::{BaseConsumer, CommitMode, Consumer, ConsumerContext, Rebalance};
use rdkafka::error::{KafkaError, KafkaResult};
use rdkafka::message::Message;
use rdkafka::topic_partition_list::TopicPartitionList;
use rdkafka::types::RDKafkaErrorCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{Error, Result};

const GROUP_ID: &str = "group.id";

/// Default consumer settings, anything in the user's consumer config takes precedence.
const CONSUMER_DEFAULTS: &[(&str, &str)] = &[
    ("enable.partition.eof", "false"),
    ("session.timeout.ms", "6000"),
    ("auto.offset.reset", "earliest"),
];

/// Offsets are committed by [KafkaSource::commit] once the records read have been written, never
/// in the background.
const CONSUMER_OVERRIDES: &[(&str, &str)] = &[("enable.auto.commit", "false")];

/// How long a stream waits before pulling again after a failed read.
const RETRY_INTERVAL: Duration = Duration::from_millis(100);

fn consumer_config(properties: &HashMap<String, String>) -> ClientConfig {
    crate::client_config(properties, CONSUMER_DEFAULTS, CONSUMER_OVERRIDES)
}

/// What a stream subscribes to.
#[derive(Debug, Clone, PartialEq)]
pub enum KafkaSubscription {
    /// A librdkafka regex subscription. New topics matching the pattern are picked up on the next
    /// metadata refresh.
    Pattern(String),
    /// A fixed list of topics.
    Topics(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct KafkaSourceConfig {
    /// Any supported kafka consumer configuration option, `group.id` is required.
    /// https://docs.confluent.io/platform/current/clients/librdkafka/html/md_CONFIGURATION.html
    pub properties: HashMap<String, String>,
}

/// A record read from Kafka.
#[derive(Debug, Clone, PartialEq)]
pub struct KafkaMessage {
    pub topic: String,
    pub key: Option<Bytes>,
    /// The user payload, empty if the record had none.
    pub value: Bytes,
    pub partition: i32,
    pub offset: i64,
}

// A context can be used to change the behavior of consumers by adding callbacks
// that will be executed by librdkafka.
struct KafkaContext {
    stream: usize,
}

impl ClientContext for KafkaContext {}

impl ConsumerContext for KafkaContext {
    fn pre_rebalance(&self, _: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        info!(stream = self.stream, "Pre rebalance {:?}", rebalance);
    }

    fn post_rebalance(&self, _: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        info!(stream = self.stream, "Post rebalance {:?}", rebalance);
    }

    fn commit_callback(&self, result: KafkaResult<()>, _offsets: &TopicPartitionList) {
        debug!(stream = self.stream, "Committing offsets: {:?}", result);
    }
}

type MirrorConsumer = StreamConsumer<KafkaContext>;

/// A consumer connector for one source cluster. Every stream it hands out is a separate member of
/// the same consumer group, so the group protocol spreads the partitions across the streams.
pub struct KafkaSource {
    config: KafkaSourceConfig,
    metadata_client: Arc<BaseConsumer>,
    /// Consumers of every stream handed out, kept for the final commit after the streams end.
    consumers: Mutex<Vec<(usize, Arc<MirrorConsumer>)>>,
    cancel_token: CancellationToken,
}

impl KafkaSource {
    pub fn new(config: KafkaSourceConfig) -> Result<Self> {
        if !config.properties.contains_key(GROUP_ID) {
            return Err(Error::Other(format!(
                "'{GROUP_ID}' is required in the consumer config"
            )));
        }

        let metadata_client: BaseConsumer =
            consumer_config(&config.properties)
                .create()
                .map_err(|err| Error::Connection {
                    server: crate::servers(&config.properties),
                    error: err.to_string(),
                })?;

        Ok(Self {
            config,
            metadata_client: Arc::new(metadata_client),
            consumers: Mutex::new(Vec::new()),
            cancel_token: CancellationToken::new(),
        })
    }

    /// Names of every topic in the cluster.
    pub async fn list_topics(&self, timeout: Duration) -> Result<Vec<String>> {
        let client = Arc::clone(&self.metadata_client);
        // fetch_metadata blocks the calling thread
        let metadata = tokio::task::spawn_blocking(move || client.fetch_metadata(None, timeout))
            .await
            .map_err(|e| Error::Other(format!("Waiting for metadata task to complete: {e:?}")))?
            .map_err(|e| Error::Kafka(format!("Failed to fetch metadata: {e}")))?;

        Ok(metadata
            .topics()
            .iter()
            .map(|topic| topic.name().to_string())
            .collect())
    }

    /// Creates `count` streams, each with its own consumer subscribed to `subscription`.
    pub fn streams(
        &self,
        count: usize,
        subscription: &KafkaSubscription,
    ) -> Result<Vec<KafkaStream>> {
        let topics: Vec<String> = match subscription {
            KafkaSubscription::Pattern(pattern) => vec![pattern.clone()],
            KafkaSubscription::Topics(topics) => topics.clone(),
        };
        if topics.is_empty() {
            return Err(Error::Other(
                "No topics selected by the topic filter".to_string(),
            ));
        }
        let topics: Vec<&str> = topics.iter().map(String::as_str).collect();

        let mut streams = Vec::with_capacity(count);
        for stream in 0..count {
            let consumer: MirrorConsumer =
                consumer_config(&self.config.properties)
                    .create_with_context(KafkaContext { stream })
                    .map_err(|err| Error::Connection {
                        server: crate::servers(&self.config.properties),
                        error: err.to_string(),
                    })?;

            // subscribing to a topic that does not exist yet is not an error, the consumer starts
            // pulling once it is created
            consumer
                .subscribe(&topics)
                .map_err(|err| Error::Kafka(format!("Failed to subscribe to {topics:?}: {err}")))?;

            let consumer = Arc::new(consumer);
            streams.push(KafkaStream {
                id: stream,
                consumer: Arc::clone(&consumer),
                cancel_token: self.cancel_token.clone(),
            });
            self.consumers.lock().push((stream, consumer));
        }
        info!(count, ?topics, "Created Kafka streams");
        Ok(streams)
    }

    /// Commits the position of every stream's consumer, the offset following the last message it
    /// returned. Call it only once everything read has been written, the next member of the group
    /// resumes from there.
    pub async fn commit(&self) -> Result<()> {
        let consumers: Vec<(usize, Arc<MirrorConsumer>)> = self
            .consumers
            .lock()
            .iter()
            .map(|(stream, consumer)| (*stream, Arc::clone(consumer)))
            .collect();
        for (stream, consumer) in consumers {
            // a synchronous commit blocks the calling thread until the broker answers
            let result = tokio::task::spawn_blocking(move || {
                consumer.commit_consumer_state(CommitMode::Sync)
            })
            .await
            .map_err(|e| Error::Other(format!("Waiting for commit task to complete: {e:?}")))?;
            match result {
                Ok(()) => info!(stream, "Committed consumer state"),
                Err(KafkaError::ConsumerCommit(RDKafkaErrorCode::NoOffset)) => {
                    debug!(stream, "Nothing consumed since the last commit")
                }
                Err(e) => {
                    return Err(Error::Kafka(format!(
                        "Failed to commit the consumer state of stream {stream}: {e}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Ends every stream created by this source. Safe to call more than once.
    pub fn stop(&self) {
        if !self.cancel_token.is_cancelled() {
            info!("Stopping Kafka source");
        }
        self.cancel_token.cancel();
    }
}

/// One member of the consumer group.
pub struct KafkaStream {
    id: usize,
    consumer: Arc<MirrorConsumer>,
    cancel_token: CancellationToken,
}

impl KafkaStream {
    /// Returns the next message, or `None` once the source has been stopped.
    pub async fn next_message(&mut self) -> Option<Result<KafkaMessage>> {
        // Return error if the number of continuous failures exceeds MAX_FAILURE_COUNT
        const MAX_FAILURE_COUNT: usize = 10;
        let mut continuous_failure_count = 0;
        loop {
            let message = tokio::select! {
                biased;

                _ = self.cancel_token.cancelled() => None,

                message = self.consumer.recv() => Some(message.map(|message| KafkaMessage {
                    topic: message.topic().to_string(),
                    key: message.key().map(Bytes::copy_from_slice),
                    // The rdkafka doc says that the payload can be None if there is no payload.
                    value: message.payload().map(Bytes::copy_from_slice).unwrap_or_default(),
                    partition: message.partition(),
                    offset: message.offset(),
                })),
            };

            let Some(message) = message else {
                debug!(stream = self.id, "Kafka stream stopped");
                return None;
            };

            match message {
                Ok(message) => return Some(Ok(message)),
                Err(e) => {
                    continuous_failure_count += 1;
                    if continuous_failure_count > MAX_FAILURE_COUNT {
                        return Some(Err(Error::Kafka(format!(
                            "Failed to read messages after {MAX_FAILURE_COUNT} retries: {e:?}"
                        ))));
                    }
                    error!(
                        stream = self.id,
                        ?e,
                        "Failed to read message, will retry after 100 milliseconds"
                    );
                    if !wait_unless_cancelled(&self.cancel_token, RETRY_INTERVAL).await {
                        return None;
                    }
                }
            }
        }
    }
}

/// Sleeps for `delay`, returns false right away if `cancel_token` fires first.
async fn wait_unless_cancelled(cancel_token: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        biased;

        _ = cancel_token.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
