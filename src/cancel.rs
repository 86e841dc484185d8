//! Cooperative cancellation for an in-flight extraction run.
//!
//! Dropping the future returned by [`crate::Extractor::extract`] already
//! aborts the pending remote call. A [`CancelToken`] covers the case where
//! the future is owned elsewhere (a spawned task, a job queue) and another
//! party needs to stop it.

use crate::error::Pdf2TableError;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

/// Clonable handle; cancelling any clone cancels all of them.
#[derive(Clone, Debug)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            // The sender lives in `self`, so `changed` cannot observe a
            // closed channel while we are borrowed.
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Drive `fut` unless cancellation wins first, in which case `fut` is
    /// dropped and [`Pdf2TableError::Cancelled`] is returned.
    pub async fn guard<F: Future>(&self, fut: F) -> Result<F::Output, Pdf2TableError> {
        if self.is_cancelled() {
            return Err(Pdf2TableError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(Pdf2TableError::Cancelled),
            out = fut => Ok(out),
        }
    }
}
