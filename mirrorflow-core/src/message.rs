use std::fmt;

use bytes::Bytes;

/// A record on its way from a source stream to a sink. Cloning only bumps the reference counts of
/// the key and payload buffers.
#[derive(Clone, PartialEq, Eq)]
pub struct Record {
    topic: String,
    key: Option<Bytes>,
    payload: Bytes,
}

impl Record {
    /// An empty key is the same as no key.
    pub fn new(topic: impl Into<String>, key: Option<Bytes>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            key: key.filter(|key| !key.is_empty()),
            payload: payload.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn key(&self) -> Option<&Bytes> {
        self.key.as_ref()
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("topic", &self.topic)
            .field("key", &self.key.as_ref().map(|k| String::from_utf8_lossy(k)))
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// Element of the shared relay channel. `Shutdown` tells exactly one sender worker to stop and is
/// never handed to a sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Envelope {
    Record(Record),
    Shutdown,
}
