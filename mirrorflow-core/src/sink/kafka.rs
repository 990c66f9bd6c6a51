use mirrorflow_kafka::KafkaSink;

use crate::error::{Error, Result};
use crate::message::Record;
use crate::sink::Sink;

impl Sink for KafkaSink {
    async fn send(&self, record: &Record) -> Result<()> {
        KafkaSink::send(self, record.topic(), record.key(), record.payload())
            .await
            .map_err(|e| Error::Sink(e.to_string()))
    }

    async fn close(&self) -> Result<()> {
        KafkaSink::close(self)
            .await
            .map_err(|e| Error::Sink(e.to_string()))
    }
}
