use crate::error::Result;
use crate::message::Record;
use crate::sink::Sink;

/// Logs every record it is given instead of writing it anywhere.
pub struct LogSink {
    slot: usize,
}

impl LogSink {
    pub fn new(slot: usize) -> Self {
        Self { slot }
    }
}

impl Sink for LogSink {
    async fn send(&self, record: &Record) -> Result<()> {
        let key = record
            .key()
            .map(|key| String::from_utf8_lossy(key).to_string())
            .unwrap_or_default();
        tracing::info!(
            slot = self.slot,
            topic = record.topic(),
            key,
            "Payload - {}",
            String::from_utf8_lossy(record.payload())
        );
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        tracing::info!(slot = self.slot, "Log sink closed");
        Ok(())
    }
}
