//! The fixed-size pool of concurrent [`Worker`]s.

use futures::future::join_all;
use tokio::task::JoinHandle;

use crate::config::{ConfigError, validate_workers};
use crate::worker::{RunContext, Worker, WorkerMetrics};

/// A fixed number of workers racing for the items of one queue.
///
/// The pool offers no per-worker control. Completion of the run is observed through the queue;
/// [`join`](Self::join) only collects the workers' metrics.
#[derive(Debug)]
pub struct WorkerPool {
    handles: Vec<JoinHandle<WorkerMetrics>>,
}

impl WorkerPool {
    /// Spawns `size` workers sharing the given context.
    ///
    /// Sizes outside of `1..=MAX_WORKERS` are rejected before any worker starts.
    pub fn start(size: usize, ctx: &RunContext) -> Result<Self, ConfigError> {
        let size = validate_workers(size)?;
        let handles = (0..size)
            .map(|id| tokio::spawn(Worker::new(id, ctx.clone()).run()))
            .collect();

        Ok(Self { handles })
    }

    /// The number of workers in this pool.
    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Waits for all workers to exit and merges their metrics.
    pub async fn join(self) -> WorkerMetrics {
        let mut total = WorkerMetrics::default();
        for result in join_all(self.handles).await {
            match result {
                Ok(metrics) => total.merge(&metrics),
                Err(error) => tracing::error!(
                    error = &error as &dyn std::error::Error,
                    "worker exited abnormally"
                ),
            }
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use indicatif::ProgressBar;
    use s3bench_store::InMemoryStore;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::config::MAX_WORKERS;
    use crate::worker::FailureTracker;
    use crate::workload::{Operation, Workload};

    fn context(count: usize, store: &InMemoryStore) -> RunContext {
        RunContext {
            queue: Workload::builder("").count(count).build().items().collect(),
            store: Arc::new(store.clone()),
            operation: Operation::Delete,
            cancel: CancellationToken::new(),
            failures: Arc::new(FailureTracker::new(0)),
            progress: ProgressBar::hidden(),
        }
    }

    #[tokio::test]
    async fn rejects_sizes_over_ceiling() {
        let store = InMemoryStore::new();
        let ctx = context(10, &store);

        let err = WorkerPool::start(MAX_WORKERS + 1, &ctx).unwrap_err();
        assert!(matches!(err, ConfigError::TooManyWorkers { .. }));
        assert!(WorkerPool::start(0, &ctx).is_err());

        // Nothing was withdrawn.
        assert_eq!(ctx.queue.pending(), 10);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn drains_queue() {
        let store = InMemoryStore::new();
        let ctx = context(200, &store);

        let pool = WorkerPool::start(8, &ctx).unwrap();
        assert_eq!(pool.size(), 8);

        ctx.queue.wait_until_drained().await;
        let metrics = pool.join().await;

        assert_eq!(metrics.succeeded, 200);
        assert_eq!(ctx.queue.outstanding(), 0);
    }

    #[tokio::test]
    async fn more_workers_than_items() {
        let store = InMemoryStore::new();
        let ctx = context(3, &store);

        let pool = WorkerPool::start(MAX_WORKERS, &ctx).unwrap();
        ctx.queue.wait_until_drained().await;

        assert_eq!(pool.join().await.succeeded, 3);
        assert_eq!(ctx.queue.outstanding(), 0);
    }
}
