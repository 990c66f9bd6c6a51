use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::channel::RelayChannel;
use crate::error::{Error, Result};
use crate::latch::CompletionLatch;
use crate::message::Record;
use crate::metrics::{
    ROUTE_DIRECT, ROUTE_SHARED, reader_labels, relay_metrics, route_labels, write_labels,
};
use crate::router::{Route, Router};
use crate::sink::{Sink, SinkSlot};
use crate::source::SourceStream;

/// Pulls records from one source stream and hands each of them off: unkeyed records go to the
/// shared relay channel, keyed records go straight to the sink of the slot their key maps to.
///
/// The worker stops when its stream ends (the connector was stopped) or on the first error. It is
/// never restarted; the failure is logged and reported through `failed`.
pub(crate) struct ReaderWorker<S, K> {
    id: usize,
    stream: S,
    channel: RelayChannel,
    router: Router,
    slots: Arc<[SinkSlot<K>]>,
    latch: CompletionLatch,
    failed: CancellationToken,
}

impl<S, K> ReaderWorker<S, K>
where
    S: SourceStream,
    K: Sink + Sync + 'static,
{
    pub(crate) fn new(
        id: usize,
        stream: S,
        channel: RelayChannel,
        router: Router,
        slots: Arc<[SinkSlot<K>]>,
        failed: CancellationToken,
    ) -> Self {
        Self {
            id,
            stream,
            channel,
            router,
            slots,
            latch: CompletionLatch::new(),
            failed,
        }
    }

    pub(crate) fn start(self) -> ReaderHandle {
        let id = self.id;
        let latch = self.latch.clone();
        let task = tokio::spawn(self.run());
        ReaderHandle { id, latch, task }
    }

    async fn run(mut self) {
        let _guard = self.latch.guard();
        info!(reader = self.id, "Reader started");
        match self.forward().await {
            Ok(()) => info!(reader = self.id, "Source stream ended, reader stopped"),
            Err(e) => {
                error!(reader = self.id, ?e, "Reader stopped on a fatal error");
                self.failed.cancel();
            }
        }
    }

    async fn forward(&mut self) -> Result<()> {
        let read_total = relay_metrics()
            .read_total
            .get_or_create(&reader_labels(self.id))
            .clone();
        while let Some(record) = self.stream.next().await {
            let record = record?;
            read_total.inc();
            self.route(record).await?;
        }
        Ok(())
    }

    async fn route(&mut self, record: Record) -> Result<()> {
        match self.router.route(record.key().map(|key| key.as_ref())) {
            Route::Shared => {
                // waits here while the channel is full
                self.channel.put(record).await?;
                relay_metrics()
                    .channel_depth
                    .set(self.channel.len() as i64);
                relay_metrics()
                    .routed_total
                    .get_or_create(&route_labels(ROUTE_SHARED))
                    .inc();
            }
            Route::Direct(slot) => {
                let slot = self.slots.get(slot).ok_or_else(|| {
                    Error::Config(format!("no sender slot {slot} for a keyed record"))
                })?;
                relay_metrics()
                    .routed_total
                    .get_or_create(&route_labels(ROUTE_DIRECT))
                    .inc();
                if let Err(e) = slot.sink.send(&record).await {
                    relay_metrics()
                        .write_error_total
                        .get_or_create(&write_labels(slot.id, ROUTE_DIRECT))
                        .inc();
                    return Err(e);
                }
                relay_metrics()
                    .write_total
                    .get_or_create(&write_labels(slot.id, ROUTE_DIRECT))
                    .inc();
            }
        }
        Ok(())
    }
}

/// What the coordinator keeps of a started reader.
pub(crate) struct ReaderHandle {
    id: usize,
    latch: CompletionLatch,
    task: JoinHandle<()>,
}

impl ReaderHandle {
    pub(crate) fn latch(&self) -> &CompletionLatch {
        &self.latch
    }

    /// Waits for the reader to finish. A reader still running at `deadline` is aborted, whatever it
    /// was forwarding is lost. Returns whether the reader exited on its own.
    pub(crate) async fn join(self, deadline: Instant) -> bool {
        if !self.latch.is_released() {
            debug!(reader = self.id, "Waiting for the reader to stop");
        }
        let mut exited = true;
        if tokio::time::timeout_at(deadline, self.latch.wait())
            .await
            .is_err()
        {
            error!(
                reader = self.id,
                "Timed out waiting for the reader to stop, aborting it. In-flight records may be lost"
            );
            self.task.abort();
            exited = false;
        }
        if let Err(e) = self.task.await {
            if e.is_panic() {
                error!(reader = self.id, ?e, "Reader panicked");
                exited = false;
            }
        }
        exited
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;

    use super::*;
    use crate::message::Envelope;
    use crate::shared::test_utils::{Delivered, RecordingSink, ScriptedStream, wait_until};

    fn slots(count: usize, delivered: &Delivered) -> Arc<[SinkSlot<RecordingSink>]> {
        (0..count)
            .map(|id| SinkSlot::new(id, RecordingSink::new(id, delivered.clone())))
            .collect::<Vec<_>>()
            .into()
    }

    fn keyed(key: &'static str, payload: &'static str) -> Record {
        Record::new("t", Some(Bytes::from_static(key.as_bytes())), payload)
    }

    fn unkeyed(payload: &'static str) -> Record {
        Record::new("t", None, payload)
    }

    #[tokio::test]
    async fn test_routes_by_key() {
        let delivered = Delivered::default();
        let channel = RelayChannel::new(10).unwrap();
        let router = Router::new(2).unwrap();
        let stream = ScriptedStream::finite(vec![
            Ok(unkeyed("a")),
            Ok(keyed("k1", "b")),
            Ok(unkeyed("c")),
        ]);

        let reader = ReaderWorker::new(
            0,
            stream,
            channel.clone(),
            router,
            slots(2, &delivered),
            CancellationToken::new(),
        )
        .start();
        tokio::time::timeout(Duration::from_secs(1), reader.latch().wait())
            .await
            .unwrap();

        // the keyed record bypasses the channel
        let Route::Direct(slot) = router.route(Some(b"k1".as_slice())) else {
            panic!("keyed record must be routed directly");
        };
        assert_eq!(delivered.records(), vec![(slot, keyed("k1", "b"))]);

        // the unkeyed ones are in the channel in the order they were read
        assert_eq!(channel.len(), 2);
        assert_eq!(channel.take().await.unwrap(), Envelope::Record(unkeyed("a")));
        assert_eq!(channel.take().await.unwrap(), Envelope::Record(unkeyed("c")));
    }

    #[tokio::test]
    async fn test_blocks_on_full_channel() {
        let delivered = Delivered::default();
        let channel = RelayChannel::new(1).unwrap();
        let stream = ScriptedStream::finite(vec![Ok(unkeyed("a")), Ok(unkeyed("b"))]);

        let reader = ReaderWorker::new(
            0,
            stream,
            channel.clone(),
            Router::new(1).unwrap(),
            slots(1, &delivered),
            CancellationToken::new(),
        )
        .start();

        // the second record waits for room, nothing is dropped
        wait_until(|| channel.len() == 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!reader.latch().is_released());

        assert_eq!(channel.take().await.unwrap(), Envelope::Record(unkeyed("a")));
        tokio::time::timeout(Duration::from_secs(1), reader.latch().wait())
            .await
            .unwrap();
        assert_eq!(channel.take().await.unwrap(), Envelope::Record(unkeyed("b")));
    }

    #[tokio::test]
    async fn test_stream_error_stops_reader() {
        let delivered = Delivered::default();
        let channel = RelayChannel::new(10).unwrap();
        let failed = CancellationToken::new();
        let stream = ScriptedStream::finite(vec![
            Ok(unkeyed("a")),
            Err(Error::Source("broker went away".to_string())),
            Ok(unkeyed("never")),
        ]);

        let reader = ReaderWorker::new(
            0,
            stream,
            channel.clone(),
            Router::new(1).unwrap(),
            slots(1, &delivered),
            failed.clone(),
        )
        .start();
        tokio::time::timeout(Duration::from_secs(1), reader.latch().wait())
            .await
            .unwrap();

        assert!(failed.is_cancelled());
        assert_eq!(channel.len(), 1);
        assert!(reader.join(Instant::now() + Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_direct_send_error_stops_reader() {
        let delivered = Delivered::default();
        let failed = CancellationToken::new();
        let slots: Arc<[SinkSlot<RecordingSink>]> = vec![SinkSlot::new(
            0,
            RecordingSink::new(0, delivered.clone()).fail_on("b"),
        )]
        .into();
        let stream = ScriptedStream::finite(vec![
            Ok(keyed("k", "a")),
            Ok(keyed("k", "b")),
            Ok(keyed("k", "c")),
        ]);

        let reader = ReaderWorker::new(
            0,
            stream,
            RelayChannel::new(10).unwrap(),
            Router::new(1).unwrap(),
            slots,
            failed.clone(),
        )
        .start();
        tokio::time::timeout(Duration::from_secs(1), reader.latch().wait())
            .await
            .unwrap();

        assert!(failed.is_cancelled());
        assert_eq!(delivered.payloads(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_join_aborts_stuck_reader() {
        let delivered = Delivered::default();
        let channel = RelayChannel::new(1).unwrap();
        // nobody drains the channel, the reader is stuck on the second put
        let stream = ScriptedStream::finite(vec![Ok(unkeyed("a")), Ok(unkeyed("b"))]);
        let reader = ReaderWorker::new(
            0,
            stream,
            channel.clone(),
            Router::new(1).unwrap(),
            slots(1, &delivered),
            CancellationToken::new(),
        )
        .start();
        wait_until(|| channel.len() == 1).await;

        let latch = reader.latch().clone();
        let exited = tokio::time::timeout(
            Duration::from_secs(1),
            reader.join(Instant::now() + Duration::from_millis(50)),
        )
        .await
        .unwrap();
        assert!(!exited);
        // aborting drops the task and with it the latch guard
        assert!(latch.is_released());
    }

    /// A stream only has to be `Send`, consumers commonly hold `!Sync` state.
    struct UnsyncStream {
        inner: ScriptedStream,
        _unsync: std::cell::Cell<()>,
    }

    impl SourceStream for UnsyncStream {
        async fn next(&mut self) -> Option<Result<Record>> {
            self.inner.next().await
        }
    }

    #[tokio::test]
    async fn test_reader_over_unsync_stream() {
        let delivered = Delivered::default();
        let channel = RelayChannel::new(10).unwrap();
        let router = Router::new(2).unwrap();
        let stream = UnsyncStream {
            inner: ScriptedStream::finite(vec![Ok(unkeyed("a")), Ok(keyed("k1", "b"))]),
            _unsync: std::cell::Cell::new(()),
        };

        // spawning needs the routing future to be Send while it holds the worker
        let reader = ReaderWorker::new(
            0,
            stream,
            channel.clone(),
            router,
            slots(2, &delivered),
            CancellationToken::new(),
        )
        .start();
        assert!(reader.join(Instant::now() + Duration::from_secs(1)).await);

        assert_eq!(delivered.payloads(), vec!["b"]);
        assert_eq!(channel.take().await.unwrap(), Envelope::Record(unkeyed("a")));
    }
}
