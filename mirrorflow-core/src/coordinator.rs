//! The coordinator owns both worker sets. It starts them in an order that lets readers route keyed
//! records to senders from their first record, and shuts them down in two phases:
//!
//! 1. stop the source connectors and wait until every reader has exited, nothing is written to the
//!    relay channel after this point
//! 2. enqueue one shutdown sentinel per sender, behind every record still queued, and wait until
//!    every sender has exited before closing its sink
//!
//! so that every record a reader handed off before shutdown reaches a sink. Only then, and only if
//! no worker failed or had to be aborted, are the connectors asked to commit what their streams
//! returned.

use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::channel::RelayChannel;
use crate::config::{FailurePolicy, RelayConfig};
use crate::error::{Error, Result};
use crate::latch::CompletionLatch;
use crate::reader::{ReaderHandle, ReaderWorker};
use crate::router::Router;
use crate::sender::SenderWorker;
use crate::sink::{Sink, SinkSlot};
use crate::source::SourceConnector;

/// Running relay. `shutdown` takes `&self`, share the coordinator through an [Arc] to trigger it
/// from a signal handler task.
pub struct Coordinator<C, K> {
    config: RelayConfig,
    connectors: Vec<C>,
    reader_latches: Vec<CompletionLatch>,
    failed: CancellationToken,
    // `None` once shutdown has run
    workers: Mutex<Option<Workers<K>>>,
}

struct Workers<K> {
    readers: Vec<ReaderHandle>,
    senders: Vec<SenderWorker<K>>,
}

impl<C, K> Coordinator<C, K>
where
    C: SourceConnector,
    K: Sink + Sync + 'static,
{
    /// Creates one sender per sink and one reader per stream derived from the connectors, then
    /// starts all of them. If no worker can be started, the connectors are stopped and the sinks are
    /// closed before the error is returned.
    pub async fn start(config: RelayConfig, connectors: Vec<C>, sinks: Vec<K>) -> Result<Self> {
        let router = match Router::new(sinks.len()) {
            Ok(router) => router,
            Err(e) => {
                stop_connectors(&connectors);
                return Err(e);
            }
        };
        let channel = match RelayChannel::new(config.channel_capacity) {
            Ok(channel) => channel,
            Err(e) => {
                stop_connectors(&connectors);
                close_sinks(sinks).await;
                return Err(e);
            }
        };

        let failed = CancellationToken::new();
        let slots: Vec<SinkSlot<K>> = sinks
            .into_iter()
            .enumerate()
            .map(|(id, sink)| SinkSlot::new(id, sink))
            .collect();
        let mut senders: Vec<SenderWorker<K>> = slots
            .iter()
            .map(|slot| SenderWorker::new(slot.clone(), channel.clone(), failed.clone()))
            .collect();
        let slots: Arc<[SinkSlot<K>]> = slots.into();

        let mut streams = Vec::new();
        for (source, connector) in connectors.iter().enumerate() {
            match connector.streams(config.num_streams).await {
                Ok(created) => streams.extend(created),
                Err(e) => {
                    error!(source, ?e, "Failed to create source streams");
                    stop_connectors(&connectors);
                    for sender in senders {
                        sender.close().await;
                    }
                    return Err(match e {
                        Error::StreamCreation(_) => e,
                        other => Error::StreamCreation(other.to_string()),
                    });
                }
            }
        }

        let readers: Vec<ReaderHandle> = streams
            .into_iter()
            .enumerate()
            .map(|(id, stream)| {
                ReaderWorker::new(
                    id,
                    stream,
                    channel.clone(),
                    router,
                    Arc::clone(&slots),
                    failed.clone(),
                )
                .start()
            })
            .collect();
        for sender in &mut senders {
            sender.start();
        }

        info!(
            sources = connectors.len(),
            readers = readers.len(),
            senders = senders.len(),
            capacity = channel.capacity(),
            "Relay started"
        );
        Ok(Self {
            reader_latches: readers.iter().map(|r| r.latch().clone()).collect(),
            config,
            connectors,
            failed,
            workers: Mutex::new(Some(Workers { readers, senders })),
        })
    }

    /// Resolves once every reader has exited, because its stream ended or it failed.
    pub async fn readers_finished(&self) {
        join_all(self.reader_latches.iter().map(|latch| latch.wait())).await;
    }

    /// Resolves once any worker has stopped on a fatal error.
    pub async fn failed(&self) {
        self.failed.cancelled().await
    }

    /// Runs until `signal` resolves or every reader has exited, or, with
    /// [FailurePolicy::Shutdown], until the first worker failure. Then shuts down.
    pub async fn run_until(&self, signal: impl Future<Output = ()>) {
        let fail_fast = self.config.on_failure == FailurePolicy::Shutdown;
        tokio::select! {
            _ = signal => info!("Shutdown requested"),
            _ = self.readers_finished() => warn!("Every reader has exited"),
            _ = self.failed(), if fail_fast => error!("A worker failed, shutting down the relay"),
        }
        self.shutdown().await;
    }

    /// Stops the relay. Can be called any number of times and from several tasks, only the first
    /// call does anything and the others wait for it to complete.
    pub async fn shutdown(&self) {
        let mut workers = self.workers.lock().await;
        let Some(Workers { readers, senders }) = workers.take() else {
            debug!("Relay already shut down");
            return;
        };

        info!("Stopping source connectors");
        stop_connectors(&self.connectors);

        let deadline = Instant::now() + self.config.drain_timeout;
        let mut drained = join_all(readers.into_iter().map(|reader| reader.join(deadline)))
            .await
            .into_iter()
            .all(|exited| exited);
        info!("Every reader has exited, stopping the senders");

        // the channel can be full, each sentinel waits for room
        let deadline = Instant::now() + self.config.drain_timeout;
        for sender in &senders {
            match tokio::time::timeout_at(deadline, sender.shutdown()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(?e, "Failed to enqueue a shutdown sentinel");
                    drained = false;
                }
                Err(_) => {
                    error!("Timed out enqueueing a shutdown sentinel. Records may be lost");
                    drained = false;
                    break;
                }
            }
        }

        let deadline = Instant::now() + self.config.drain_timeout;
        drained &= join_all(senders.into_iter().map(|sender| sender.await_shutdown(deadline)))
            .await
            .into_iter()
            .all(|exited| exited);

        if drained && !self.failed.is_cancelled() {
            commit_connectors(&self.connectors).await;
        } else {
            warn!(
                "Not every record read was written, skipping the offset commit. Records read since \
                 the last commit will be mirrored again"
            );
        }
        info!("Relay shut down");
    }
}

fn stop_connectors<C: SourceConnector>(connectors: &[C]) {
    for connector in connectors {
        connector.stop();
    }
}

async fn commit_connectors<C: SourceConnector>(connectors: &[C]) {
    for (source, connector) in connectors.iter().enumerate() {
        match connector.commit().await {
            Ok(()) => debug!(source, "Committed source offsets"),
            Err(e) => error!(source, ?e, "Failed to commit source offsets"),
        }
    }
}

async fn close_sinks<K: Sink>(sinks: Vec<K>) {
    for (slot, sink) in sinks.iter().enumerate() {
        if let Err(e) = sink.close().await {
            error!(slot, ?e, "Failed to close sink");
        }
    }
}
