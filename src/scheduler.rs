//! Periodic sweep that reclaims jobs whose lease expired without a matching
//! Complete call — a crashed or partitioned worker. Runs independently of
//! any [`crate::worker::Worker`] and is safe to run from more than one
//! process at once; [`crate::lease::LeaseCoordinator::recover_expired`]
//! does the actual work per tick.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument};

use crate::error::QueueResult;
use crate::lease::LeaseCoordinator;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval_secs: u64,
}

impl SchedulerConfig {
    pub fn new(interval_secs: u64) -> Self {
        Self { interval_secs }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { interval_secs: 30 }
    }
}

pub struct SchedulerHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    join_handle: JoinHandle<QueueResult<()>>,
}

impl SchedulerHandle {
    pub async fn shutdown(mut self) -> QueueResult<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.join_handle
            .await
            .unwrap_or_else(|join_err| Err(join_err.into()))
    }
}

pub struct RecoveryScheduler {
    config: SchedulerConfig,
    lease: Arc<LeaseCoordinator>,
}

impl RecoveryScheduler {
    pub fn new(config: SchedulerConfig, lease: Arc<LeaseCoordinator>) -> Self {
        Self { config, lease }
    }

    pub fn spawn(self) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let join_handle = tokio::spawn(self.run(shutdown_rx));
        SchedulerHandle {
            shutdown_tx: Some(shutdown_tx),
            join_handle,
        }
    }

    #[instrument(skip(self, shutdown_rx))]
    async fn run(self, mut shutdown_rx: oneshot::Receiver<()>) -> QueueResult<()> {
        info!(interval_secs = self.config.interval_secs, "recovery scheduler starting");
        let mut ticker = tokio::time::interval(StdDuration::from_secs(self.config.interval_secs.max(1)));

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown_rx => {
                    info!("recovery scheduler shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    match self.lease.recover_expired().await {
                        Ok(count) if count > 0 => info!(count, "reclaimed expired leases"),
                        Ok(_) => {}
                        Err(err) => error!(%err, "recovery sweep failed"),
                    }
                }
            }
        }

        info!("recovery scheduler stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::store::{JobStore, MemoryJobStore};
    use crate::types::NewJob;
    use chrono::{Duration, Utc};
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn scheduler_reclaims_an_expired_lease_on_its_first_tick() {
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let t0 = Utc::now() - Duration::seconds(120);
        let clock = Arc::new(FixedClock::new(t0));
        let lease = Arc::new(LeaseCoordinator::new(store.clone(), clock.clone()));

        let job = store
            .create(NewJob::new("h", serde_json::json!({})).run_at(t0))
            .await
            .unwrap();
        lease
            .claim_next("w1", &["default".to_string()], 5)
            .await
            .unwrap();
        clock.set(t0 + Duration::seconds(120));

        let scheduler = RecoveryScheduler::new(SchedulerConfig::new(1), lease);
        let handle = scheduler.spawn();
        tokio::time::sleep(StdDuration::from_millis(1200)).await;
        handle.shutdown().await.unwrap();

        let after = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(after.status, crate::types::JobStatus::Queued);
    }
}
