//! Supervised background cleanup of corrupted cache entries.

use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;

use crate::backend::KvBackend;
use crate::events::{CacheEventLogger, LogLevel};

/// Upper bound of concurrently running cleanup deletions.
pub const MAX_PENDING_CLEANUPS: usize = 64;

/// Bounded, tracked set of fire-and-forget deletions.
///
/// Deleting a corrupted entry never blocks the request that found it. The
/// delete only fires while the key still holds the corrupted value, so a
/// write-back racing the cleanup survives it. When the set is saturated
/// further cleanups are skipped: the entry stays until its TTL expires or a
/// later read retries the delete.
#[derive(Clone)]
pub struct CleanupTasks {
    tracker: TaskTracker,
    permits: Arc<Semaphore>,
    logger: CacheEventLogger,
}

impl CleanupTasks {
    pub fn new(limit: usize, logger: CacheEventLogger) -> Self {
        Self {
            tracker: TaskTracker::new(),
            permits: Arc::new(Semaphore::new(limit.max(1))),
            logger,
        }
    }

    /// Schedules deletion of `key` while it holds `corrupted`. Returns `false`
    /// if the set is saturated.
    pub fn spawn_evict(&self, backend: Arc<dyn KvBackend>, key: String, corrupted: String) -> bool {
        let permit = match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::debug!(key = %key, "cleanup set saturated, skipping delete");
                return false;
            }
        };

        let logger = self.logger;
        self.tracker.spawn(async move {
            let _permit = permit;
            match backend.compare_and_delete(&key, &corrupted).await {
                Ok(removed) => logger
                    .event(LogLevel::Info, "evict_corrupted")
                    .key(&key)
                    .success(removed)
                    .emit(),
                Err(e) => logger
                    .event(LogLevel::Warn, "evict_corrupted")
                    .key(&key)
                    .success(false)
                    .error(e)
                    .emit(),
            }
        });
        true
    }

    /// Number of cleanups still running.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Waits for every scheduled cleanup to finish.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}
