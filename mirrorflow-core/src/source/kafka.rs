use std::time::Duration;

use mirrorflow_kafka::{
    KafkaMessage, KafkaSource, KafkaSourceConfig, KafkaStream, KafkaSubscription,
};
use tracing::{debug, info};

use crate::config::{Properties, TopicFilter};
use crate::error::{Error, Result};
use crate::message::Record;
use crate::source::{SourceConnector, SourceStream};

const METADATA_TIMEOUT: Duration = Duration::from_secs(10);

impl From<KafkaMessage> for Record {
    fn from(message: KafkaMessage) -> Self {
        Record::new(message.topic, message.key, message.value)
    }
}

/// A consumer connector to one source cluster, restricted to the topics allowed by the filter.
pub struct KafkaConnector {
    source: KafkaSource,
    filter: TopicFilter,
}

impl KafkaConnector {
    pub fn new(properties: Properties, filter: TopicFilter) -> Result<Self> {
        let source = KafkaSource::new(KafkaSourceConfig { properties })?;
        Ok(Self { source, filter })
    }

    /// An inclusion filter becomes a regex subscription. An exclusion filter cannot be expressed
    /// that way, so it is resolved against the topics that exist right now.
    async fn subscription(&self) -> Result<KafkaSubscription> {
        if let Some(pattern) = self.filter.subscription_pattern() {
            return Ok(KafkaSubscription::Pattern(pattern));
        }
        let topics: Vec<String> = self
            .source
            .list_topics(METADATA_TIMEOUT)
            .await?
            .into_iter()
            .filter(|topic| self.filter.is_allowed(topic))
            .collect();
        info!(?topics, "Resolved exclusion filter");
        Ok(KafkaSubscription::Topics(topics))
    }
}

impl SourceConnector for KafkaConnector {
    type Stream = FilteredStream;

    async fn streams(&self, count: usize) -> Result<Vec<FilteredStream>> {
        let subscription = self
            .subscription()
            .await
            .map_err(|e| Error::StreamCreation(e.to_string()))?;
        let streams = self
            .source
            .streams(count, &subscription)
            .map_err(|e| Error::StreamCreation(e.to_string()))?;
        Ok(streams
            .into_iter()
            .map(|stream| FilteredStream {
                stream,
                filter: self.filter.clone(),
            })
            .collect())
    }

    fn stop(&self) {
        self.source.stop();
    }

    async fn commit(&self) -> Result<()> {
        Ok(self.source.commit().await?)
    }
}

/// A Kafka stream that drops the records of topics the filter rejects. A regex subscription can
/// match internal topics, they are skipped here.
pub struct FilteredStream {
    stream: KafkaStream,
    filter: TopicFilter,
}

impl SourceStream for FilteredStream {
    async fn next(&mut self) -> Option<Result<Record>> {
        loop {
            match self.stream.next_message().await? {
                Ok(message) if !self.filter.is_allowed(&message.topic) => {
                    debug!(topic = %message.topic, "Skipping record of a filtered out topic");
                }
                message => return Some(message.map(Record::from).map_err(Error::from)),
            }
        }
    }
}
