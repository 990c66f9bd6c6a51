use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::channel::RelayChannel;
use crate::error::Result;
use crate::latch::CompletionLatch;
use crate::message::Envelope;
use crate::metrics::{ROUTE_SHARED, relay_metrics, write_labels};
use crate::sink::{Sink, SinkSlot};

/// Drains the shared relay channel into the sink of one sender slot until it takes a shutdown
/// sentinel. A failed write stops the worker, it is not restarted.
pub(crate) struct SenderWorker<K> {
    slot: SinkSlot<K>,
    channel: RelayChannel,
    latch: CompletionLatch,
    failed: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl<K> SenderWorker<K>
where
    K: Sink + Sync + 'static,
{
    pub(crate) fn new(slot: SinkSlot<K>, channel: RelayChannel, failed: CancellationToken) -> Self {
        Self {
            slot,
            channel,
            latch: CompletionLatch::new(),
            failed,
            task: None,
        }
    }

    pub(crate) fn start(&mut self) {
        if self.task.is_some() {
            warn!(sender = self.slot.id, "Sender already started");
            return;
        }
        self.task = Some(tokio::spawn(drain(
            self.slot.clone(),
            self.channel.clone(),
            self.latch.clone(),
            self.failed.clone(),
        )));
    }

    #[cfg(test)]
    pub(crate) fn latch(&self) -> &CompletionLatch {
        &self.latch
    }

    /// Enqueues one shutdown sentinel behind everything already in the channel. Whichever sender
    /// takes it stops, not necessarily this one.
    pub(crate) async fn shutdown(&self) -> Result<()> {
        self.channel.put_shutdown().await
    }

    /// Waits for the worker to stop, then closes its sink. A worker still draining at `deadline` is
    /// aborted and the records left in the channel are lost. Returns whether the worker exited on
    /// its own and its sink closed cleanly.
    pub(crate) async fn await_shutdown(mut self, deadline: Instant) -> bool {
        let mut exited = true;
        if let Some(task) = self.task.take() {
            if tokio::time::timeout_at(deadline, self.latch.wait())
                .await
                .is_err()
            {
                error!(
                    sender = self.slot.id,
                    pending = self.channel.len(),
                    "Timed out waiting for the sender to drain the relay channel, aborting it. Records may be lost"
                );
                task.abort();
                exited = false;
            }
            if let Err(e) = task.await {
                if e.is_panic() {
                    error!(sender = self.slot.id, ?e, "Sender panicked");
                    exited = false;
                }
            }
        }
        self.close().await && exited
    }

    /// Closes the sink of this slot, flushing what it buffers. Consuming the worker makes this
    /// happen at most once.
    pub(crate) async fn close(self) -> bool {
        match self.slot.sink.close().await {
            Ok(()) => {
                info!(sender = self.slot.id, "Closed sink");
                true
            }
            Err(e) => {
                error!(sender = self.slot.id, ?e, "Failed to close sink");
                false
            }
        }
    }
}

async fn drain<K>(
    slot: SinkSlot<K>,
    channel: RelayChannel,
    latch: CompletionLatch,
    failed: CancellationToken,
) where
    K: Sink + Sync + 'static,
{
    let _guard = latch.guard();
    info!(sender = slot.id, "Sender started");
    let write_total = relay_metrics()
        .write_total
        .get_or_create(&write_labels(slot.id, ROUTE_SHARED))
        .clone();
    loop {
        let record = match channel.take().await {
            Ok(Envelope::Record(record)) => record,
            Ok(Envelope::Shutdown) => {
                info!(sender = slot.id, "Received shutdown sentinel, sender stopped");
                break;
            }
            Err(e) => {
                error!(sender = slot.id, ?e, "Sender stopped, relay channel failed");
                failed.cancel();
                break;
            }
        };
        relay_metrics()
            .channel_depth
            .set(channel.len() as i64);

        if let Err(e) = slot.sink.send(&record).await {
            relay_metrics()
                .write_error_total
                .get_or_create(&write_labels(slot.id, ROUTE_SHARED))
                .inc();
            error!(sender = slot.id, ?e, ?record, "Sender stopped on a failed write");
            failed.cancel();
            break;
        }
        write_total.inc();
    }
}
