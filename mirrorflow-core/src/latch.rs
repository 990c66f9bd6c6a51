use tokio_util::sync::{CancellationToken, DropGuard};

/// One-shot "worker finished" signal. Any number of tasks may wait on it.
#[derive(Clone, Debug, Default)]
pub(crate) struct CompletionLatch {
    token: CancellationToken,
}

impl CompletionLatch {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Releases the latch when dropped. Workers hold it for the whole run loop so that the latch is
    /// released on every exit path, panics included.
    pub(crate) fn guard(&self) -> DropGuard {
        self.token.clone().drop_guard()
    }

    pub(crate) async fn wait(&self) {
        self.token.cancelled().await
    }

    pub(crate) fn is_released(&self) -> bool {
        self.token.is_cancelled()
    }
}
