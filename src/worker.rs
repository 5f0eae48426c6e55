//! Polls for jobs, runs them through an [`Executor`], and reports the
//! outcome back through a [`LeaseCoordinator`]. One [`Worker`] processes
//! jobs serially from a fixed set of queues; run several to fan out.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration as StdDuration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::error::QueueResult;
use crate::executor::Executor;
use crate::lease::LeaseCoordinator;

/// Static per-worker settings. `poll_interval_secs` only matters when the
/// queue is empty; a claimed job is always picked up immediately.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub queues: Vec<String>,
    pub poll_interval_secs: u64,
    pub lease_seconds: i64,
}

impl WorkerConfig {
    pub fn new(worker_id: impl Into<String>, queues: Vec<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            queues,
            poll_interval_secs: 5,
            lease_seconds: 60,
        }
    }

    pub fn poll_interval_secs(mut self, secs: u64) -> Self {
        self.poll_interval_secs = secs;
        self
    }

    pub fn lease_seconds(mut self, secs: i64) -> Self {
        self.lease_seconds = secs;
        self
    }
}

/// Running totals, readable from outside the worker loop without blocking it.
#[derive(Debug, Default)]
pub struct WorkerStats {
    processed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

impl WorkerStats {
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Handle to a spawned worker. Dropping it without calling [`shutdown`]
/// leaves the worker running detached.
///
/// [`shutdown`]: WorkerHandle::shutdown
pub struct WorkerHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    join_handle: JoinHandle<QueueResult<()>>,
    stats: Arc<WorkerStats>,
}

impl WorkerHandle {
    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    /// Signal the worker to stop after its current job and wait for it to
    /// exit. A job already claimed is always finished and completed; the
    /// worker never abandons a lease mid-execution.
    pub async fn shutdown(mut self) -> QueueResult<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.join_handle
            .await
            .unwrap_or_else(|join_err| Err(join_err.into()))
    }
}

impl From<tokio::task::JoinError> for crate::error::QueueError {
    fn from(err: tokio::task::JoinError) -> Self {
        crate::error::QueueError::Configuration(format!("worker task panicked: {err}"))
    }
}

pub struct Worker {
    config: WorkerConfig,
    lease: Arc<LeaseCoordinator>,
    executor: Arc<Executor>,
    stats: Arc<WorkerStats>,
}

impl Worker {
    pub fn new(config: WorkerConfig, lease: Arc<LeaseCoordinator>, executor: Arc<Executor>) -> Self {
        Self {
            config,
            lease,
            executor,
            stats: Arc::new(WorkerStats::default()),
        }
    }

    /// Spawn this worker onto the current tokio runtime.
    pub fn spawn(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let stats = self.stats.clone();
        let join_handle = tokio::spawn(self.run(shutdown_rx));
        WorkerHandle {
            shutdown_tx: Some(shutdown_tx),
            join_handle,
            stats,
        }
    }

    #[instrument(skip(self, shutdown_rx), fields(worker_id = %self.config.worker_id))]
    async fn run(self, mut shutdown_rx: oneshot::Receiver<()>) -> QueueResult<()> {
        info!(
            queues = ?self.config.queues,
            poll_interval_secs = self.config.poll_interval_secs,
            lease_seconds = self.config.lease_seconds,
            "worker starting"
        );

        loop {
            // Only the claim step races shutdown. Once a job is claimed it
            // always runs to completion — dropping execute()+complete() on
            // a signal would strand the row in `running` with nobody left
            // to call Complete on it.
            let claimed = tokio::select! {
                biased;
                _ = &mut shutdown_rx => {
                    info!("shutdown requested");
                    break;
                }
                claimed = self.claim_one() => claimed,
            };

            match claimed {
                Ok(Some(job)) => {
                    self.run_job(job).await;
                }
                Ok(None) => {
                    if self.sleep_or_shutdown(&mut shutdown_rx).await {
                        break;
                    }
                }
                Err(err) => {
                    error!(%err, "worker loop error");
                    if self.sleep_or_shutdown(&mut shutdown_rx).await {
                        break;
                    }
                }
            }
        }

        info!(
            processed = self.stats.processed(),
            succeeded = self.stats.succeeded(),
            failed = self.stats.failed(),
            "worker stopped"
        );
        Ok(())
    }

    /// Sleeps in one-second ticks so shutdown is never delayed by more than
    /// a second, even with a long poll interval.
    async fn sleep_or_shutdown(&self, shutdown_rx: &mut oneshot::Receiver<()>) -> bool {
        for _ in 0..self.config.poll_interval_secs.max(1) {
            tokio::select! {
                biased;
                _ = &mut *shutdown_rx => return true,
                _ = tokio::time::sleep(StdDuration::from_secs(1)) => {}
            }
        }
        false
    }

    /// Claims a single job, if one is available. This is the only step
    /// raced against shutdown.
    async fn claim_one(&self) -> QueueResult<Option<crate::types::Job>> {
        let job = self
            .lease
            .claim_next(&self.config.worker_id, &self.config.queues, self.config.lease_seconds)
            .await?;
        if let Some(job) = &job {
            info!(job_id = %job.id, handler = %job.handler, "claimed job");
        }
        Ok(job)
    }

    /// Executes an already-claimed job and reports its outcome through
    /// Complete. Runs unconditionally to the end: never cancelled by
    /// shutdown, since the row is already `running` and somebody has to
    /// resolve it.
    async fn run_job(&self, job: crate::types::Job) {
        let job_id = job.id;
        let result = self.executor.execute(&job).await;

        let completed = match self
            .lease
            .complete(
                job_id,
                &self.config.worker_id,
                result.success,
                result.error_message.as_deref(),
            )
            .await
        {
            Ok(completed) => completed,
            Err(err) => {
                error!(%job_id, %err, "failed to record completion");
                false
            }
        };

        self.stats.processed.fetch_add(1, Ordering::Relaxed);
        if result.success {
            self.stats.succeeded.fetch_add(1, Ordering::Relaxed);
            info!(%job_id, "job succeeded");
        } else {
            self.stats.failed.fetch_add(1, Ordering::Relaxed);
            warn!(%job_id, error = ?result.error_message, "job failed");
        }

        if !completed {
            warn!(%job_id, "lease was lost before completion could be recorded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::registry::HandlerRegistry;
    use crate::store::MemoryJobStore;
    use crate::types::NewJob;
    use chrono::Utc;
    use std::time::Duration;

    #[test_log::test(tokio::test)]
    async fn worker_processes_a_job_then_shuts_down_cleanly() {
        let store: Arc<dyn crate::store::JobStore> = Arc::new(MemoryJobStore::new());
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let lease = Arc::new(LeaseCoordinator::new(store.clone(), clock));

        let mut registry = HandlerRegistry::new();
        registry
            .register(
                "noop",
                |_v| async { Ok(()) },
                crate::registry::HandlerMetadata::default(),
            )
            .unwrap();
        let executor = Arc::new(Executor::new(registry));

        store
            .create(NewJob::new("noop", serde_json::json!({})))
            .await
            .unwrap();

        let config = WorkerConfig::new("w1", vec!["default".to_string()]).poll_interval_secs(1);
        let worker = Worker::new(config, lease, executor);
        let handle = worker.spawn();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handle.stats().succeeded(), 1);
        handle.shutdown().await.unwrap();
    }
}
