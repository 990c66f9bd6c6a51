use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};

use crate::error::{Error, Result};
use crate::message::{Envelope, Record};

/// Bounded FIFO between the reader workers and the sender workers. Every reader writes to it and
/// every sender reads from it. Writers wait while it is full, readers wait while it is empty.
#[derive(Clone)]
pub(crate) struct RelayChannel {
    tx: mpsc::Sender<Envelope>,
    // the receiving half is shared by all the senders, the lock is held only while one of them
    // waits for the next element so the dequeue order stays the enqueue order
    rx: Arc<Mutex<mpsc::Receiver<Envelope>>>,
    capacity: usize,
}

impl RelayChannel {
    pub(crate) fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::Config(
                "relay channel capacity must be at least 1".to_string(),
            ));
        }
        let (tx, rx) = mpsc::channel(capacity);
        Ok(Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            capacity,
        })
    }

    /// Enqueues a record, waiting for room if the channel is full.
    pub(crate) async fn put(&self, record: Record) -> Result<()> {
        self.send(Envelope::Record(record)).await
    }

    /// Enqueues one shutdown sentinel behind everything already queued.
    pub(crate) async fn put_shutdown(&self) -> Result<()> {
        self.send(Envelope::Shutdown).await
    }

    async fn send(&self, envelope: Envelope) -> Result<()> {
        self.tx
            .send(envelope)
            .await
            .map_err(|_| Error::Channel("relay channel is closed".to_string()))
    }

    /// Dequeues the oldest element, waiting while the channel is empty.
    pub(crate) async fn take(&self) -> Result<Envelope> {
        self.rx
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| Error::Channel("relay channel is closed".to_string()))
    }

    /// Number of elements enqueued but not yet dequeued.
    pub(crate) fn len(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }
}
