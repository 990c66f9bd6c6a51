use std::future::Future;

use crate::error::Result;
use crate::message::Record;

/// Kafka consumer connectors, one per source cluster.
pub mod kafka;

/// An ordered, lazily pulled sequence of records. It ends (returns `None`) once its connector has
/// been stopped.
pub trait SourceStream: Send + 'static {
    fn next(&mut self) -> impl Future<Output = Option<Result<Record>>> + Send;
}

/// Connection to one source cluster from which the reader streams are derived.
pub trait SourceConnector: Send + Sync + 'static {
    type Stream: SourceStream;

    /// Creates `count` streams. A failure here is a stream creation error and prevents the relay
    /// from starting.
    fn streams(&self, count: usize) -> impl Future<Output = Result<Vec<Self::Stream>>> + Send;

    /// Ends every stream of this connector, pending and future pulls return `None`. Idempotent.
    fn stop(&self);

    /// Records that everything its streams returned has been handled, so a restarted relay picks
    /// up after it. Called once the streams have ended and every record has been written.
    fn commit(&self) -> impl Future<Output = Result<()>> + Send;
}
