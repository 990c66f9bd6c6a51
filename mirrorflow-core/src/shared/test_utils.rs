//! In-memory sources and sinks for exercising the workers and the coordinator without brokers.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::message::Record;
use crate::sink::Sink;
use crate::source::{SourceConnector, SourceStream};

/// Polls `condition` until it holds, panics after a few seconds.
pub(crate) async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

/// Yields its scripted items in order. A finite stream ends right after them, a stoppable one then
/// waits for its connector to be stopped.
pub(crate) struct ScriptedStream {
    items: VecDeque<Result<Record>>,
    stop: Option<CancellationToken>,
}

impl ScriptedStream {
    pub(crate) fn finite(items: Vec<Result<Record>>) -> Self {
        Self {
            items: items.into(),
            stop: None,
        }
    }
}

impl SourceStream for ScriptedStream {
    async fn next(&mut self) -> Option<Result<Record>> {
        if let Some(item) = self.items.pop_front() {
            return Some(item);
        }
        if let Some(stop) = &self.stop {
            stop.cancelled().await;
        }
        None
    }
}

/// Call counters of a [ScriptedConnector], kept by the test after the connector is handed over.
#[derive(Clone, Default)]
pub(crate) struct ConnectorCalls {
    streams_calls: Arc<AtomicUsize>,
    stop_calls: Arc<AtomicUsize>,
    commit_calls: Arc<AtomicUsize>,
    closes_at_commit: Arc<Mutex<Vec<usize>>>,
}

impl ConnectorCalls {
    pub(crate) fn streams_calls(&self) -> usize {
        self.streams_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn commit_calls(&self) -> usize {
        self.commit_calls.load(Ordering::SeqCst)
    }

    /// For each commit, how many of the watched sinks had been closed at that point.
    pub(crate) fn closes_at_commit(&self) -> Vec<usize> {
        self.closes_at_commit.lock().clone()
    }
}

/// Hands out one stoppable [ScriptedStream] per script, streams beyond the scripts are empty.
pub(crate) struct ScriptedConnector {
    scripts: Mutex<VecDeque<Vec<Result<Record>>>>,
    stop: CancellationToken,
    fail: bool,
    calls: ConnectorCalls,
    watched_closes: Vec<Arc<AtomicUsize>>,
}

impl ScriptedConnector {
    pub(crate) fn new(scripts: Vec<Vec<Result<Record>>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            stop: CancellationToken::new(),
            fail: false,
            calls: ConnectorCalls::default(),
            watched_closes: Vec::new(),
        }
    }

    /// A connector whose stream creation always fails.
    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(vec![])
        }
    }

    /// Counts, at every commit, the sinks closed so far among those the counters belong to.
    pub(crate) fn watch_closes(mut self, closes: &[Arc<AtomicUsize>]) -> Self {
        self.watched_closes = closes.iter().map(Arc::clone).collect();
        self
    }

    pub(crate) fn calls(&self) -> ConnectorCalls {
        self.calls.clone()
    }
}

impl SourceConnector for ScriptedConnector {
    type Stream = ScriptedStream;

    async fn streams(&self, count: usize) -> Result<Vec<ScriptedStream>> {
        self.calls.streams_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::StreamCreation("cluster unreachable".to_string()));
        }
        let mut scripts = self.scripts.lock();
        Ok((0..count)
            .map(|_| ScriptedStream {
                items: scripts.pop_front().unwrap_or_default().into(),
                stop: Some(self.stop.clone()),
            })
            .collect())
    }

    fn stop(&self) {
        self.calls.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.stop.cancel();
    }

    async fn commit(&self) -> Result<()> {
        self.calls.commit_calls.fetch_add(1, Ordering::SeqCst);
        let closed = self
            .watched_closes
            .iter()
            .filter(|closes| closes.load(Ordering::SeqCst) > 0)
            .count();
        self.calls.closes_at_commit.lock().push(closed);
        Ok(())
    }
}

/// Everything written to any [RecordingSink] of a test, with the slot that wrote it.
#[derive(Clone, Default)]
pub(crate) struct Delivered(Arc<Mutex<Vec<(usize, Record)>>>);

impl Delivered {
    pub(crate) fn records(&self) -> Vec<(usize, Record)> {
        self.0.lock().clone()
    }

    pub(crate) fn payloads(&self) -> Vec<String> {
        self.0
            .lock()
            .iter()
            .map(|(_, record)| String::from_utf8_lossy(record.payload()).into_owned())
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.0.lock().len()
    }
}

pub(crate) struct RecordingSink {
    slot: usize,
    delivered: Delivered,
    closes: Arc<AtomicUsize>,
    fail_on: Option<&'static str>,
    delay: Option<Duration>,
}

impl RecordingSink {
    pub(crate) fn new(slot: usize, delivered: Delivered) -> Self {
        Self {
            slot,
            delivered,
            closes: Arc::new(AtomicUsize::new(0)),
            fail_on: None,
            delay: None,
        }
    }

    /// Fails the write of the record with this payload.
    pub(crate) fn fail_on(mut self, payload: &'static str) -> Self {
        self.fail_on = Some(payload);
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn closes(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.closes)
    }
}

impl Sink for RecordingSink {
    async fn send(&self, record: &Record) -> Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self
            .fail_on
            .is_some_and(|payload| record.payload().as_ref() == payload.as_bytes())
        {
            return Err(Error::Sink(format!("slot {} rejected the record", self.slot)));
        }
        self.delivered.0.lock().push((self.slot, record.clone()));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
