//! Detached side effects whose failure must not reach the caller.
//!
//! Cache hit bookkeeping and cache writes run here. Each task is spawned on
//! the current tokio runtime, its error is logged and dropped, and nothing on
//! the response path ever awaits it. [`BestEffort::drain`] exists for
//! shutdown and tests.

use std::future::Future;

use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::error::Result;

/// Group of fire-and-forget tasks.
#[derive(Debug, Clone, Default)]
pub struct BestEffort {
    tracker: TaskTracker,
}

impl BestEffort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `fut` detached. A returned error is logged under `label`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<F>(&self, label: &'static str, fut: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.tracker.spawn(async move {
            match fut.await {
                Ok(()) => debug!(task = label, "Best-effort task finished"),
                Err(e) => warn!(task = label, error = %e, "Best-effort task failed"),
            }
        });
    }

    /// Number of tasks still running.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for every task spawned so far. New tasks may be spawned afterwards.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}
