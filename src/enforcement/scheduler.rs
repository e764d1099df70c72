//! Bounded-concurrency action scheduler
//!
//! Platform-mutating calls are admitted through a fair semaphore: tasks start
//! in submission order and never more than `max_concurrent` run at once.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::ENFORCEMENT_TARGET;

/// FIFO admission queue with a fixed number of execution slots
#[derive(Debug, Clone)]
pub struct ActionScheduler {
    permits: Arc<Semaphore>,
    max_concurrent: usize,
}

impl ActionScheduler {
    /// Create a scheduler; a limit of zero is treated as one
    #[must_use]
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    #[must_use]
    pub const fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Number of tasks currently holding a slot
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.max_concurrent - self.permits.available_permits()
    }

    /// Wait for a slot, run the task, release the slot.
    ///
    /// The slot is released when the task finishes, whatever its output, so a
    /// failing task never holds up the ones queued behind it.
    pub async fn submit<F, T>(&self, task: F) -> T
    where
        F: Future<Output = T>,
    {
        let permit = match self.permits.acquire().await {
            Ok(permit) => Some(permit),
            Err(e) => {
                warn!(target: ENFORCEMENT_TARGET, error = %e, "Scheduler closed, running task unthrottled");
                None
            }
        };
        debug!(
            target: ENFORCEMENT_TARGET,
            in_flight = self.in_flight(),
            max = self.max_concurrent,
            "Task admitted"
        );
        let output = task.await;
        drop(permit);
        output
    }
}
