//! Composes Policy + JobStore into the four core operations named in §4.3.
//! Thin orchestration: every method here is a handful of store calls plus a
//! Policy decision, with no state of its own beyond the store and clock it
//! was built with.

use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::clock::Clock;
use crate::error::QueueResult;
use crate::policy;
use crate::store::JobStore;
use crate::types::{Job, JobId};

pub struct LeaseCoordinator {
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
}

impl LeaseCoordinator {
    pub fn new(store: Arc<dyn JobStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// ClaimNext: at most one job per call; two concurrent calls against the
    /// same backing store never return the same job.
    #[instrument(skip(self, queues), fields(worker_id))]
    pub async fn claim_next(
        &self,
        worker_id: &str,
        queues: &[String],
        lease_seconds: i64,
    ) -> QueueResult<Option<Job>> {
        let now = self.clock.now();
        let claimed = self.store.claim_next(worker_id, queues, now, lease_seconds).await?;
        if let Some(job) = &claimed {
            debug!(job_id = %job.id, "claimed job");
        }
        Ok(claimed)
    }

    /// Heartbeat: extends the lease iff the caller still owns it. A `false`
    /// return means the caller has lost the lease and MUST stop work.
    pub async fn heartbeat(
        &self,
        job_id: JobId,
        worker_id: &str,
        lease_seconds: i64,
    ) -> QueueResult<bool> {
        let now = self.clock.now();
        let Some(job) = self.store.get(job_id).await? else {
            return Ok(false);
        };
        if !policy::owns_lease(&job, worker_id) {
            return Ok(false);
        }
        let expires_at = policy::compute_lease_expiry(now, lease_seconds);
        self.store
            .set_heartbeat(job_id, worker_id, expires_at, now)
            .await
    }

    /// Complete: fetches the job, checks ownership, and applies the
    /// resulting transition. Returns `false` if the caller no longer owns
    /// the lease — its result is discarded, per the cooperative-lease model.
    pub async fn complete(
        &self,
        job_id: JobId,
        worker_id: &str,
        success: bool,
        error: Option<&str>,
    ) -> QueueResult<bool> {
        let now = self.clock.now();
        let Some(job) = self.store.get(job_id).await? else {
            return Ok(false);
        };
        if !policy::owns_lease(&job, worker_id) {
            return Ok(false);
        }

        match policy::decide_completion(&job, success) {
            policy::CompletionOutcome::Succeeded => self.store.set_succeeded(job_id, worker_id).await,
            policy::CompletionOutcome::Dead => {
                let message = error.unwrap_or("Max attempts exceeded");
                Ok(self
                    .store
                    .set_dead_after_failure(job_id, Some(worker_id), message)
                    .await?
                    .is_some())
            }
            policy::CompletionOutcome::Retry => {
                // attempts+1 is exactly what the store's atomic update below
                // will land, since the ownership+status guard it re-checks
                // rules out any concurrent writer changing it first.
                let attempts_after = job.attempts + 1;
                let next_run = policy::compute_next_run_at(now, attempts_after);
                let message = error.unwrap_or("Unknown error");
                Ok(self
                    .store
                    .set_retry_after_failure(job_id, Some(worker_id), Some(message), next_run)
                    .await?
                    .is_some())
            }
        }
    }

    /// RecoverExpired: sweeps every `running` row whose lease has expired.
    /// Returns the number of rows reclaimed into `queued` (rows set `dead`
    /// don't count). Safe to run concurrently with itself and with workers.
    #[instrument(skip(self))]
    pub async fn recover_expired(&self) -> QueueResult<i32> {
        let now = self.clock.now();
        let expired = self.store.find_expired_leases(now).await?;
        let mut reclaimed = 0;

        for job in expired {
            // attempts+1 is what each atomic update below lands; no owner
            // check guards these (recovery doesn't care who held the stale
            // lease), only the `running` status re-checked by the store.
            let attempts_after = job.attempts + 1;

            match policy::decide_recovery(job.attempts, job.max_attempts) {
                policy::CompletionOutcome::Dead => {
                    self.store
                        .set_dead_after_failure(job.id, None, "Lease expired - worker presumed dead")
                        .await?;
                }
                _ => {
                    let next_run = policy::compute_next_run_at(now, attempts_after);
                    if self
                        .store
                        .set_retry_after_failure(job.id, None, None, next_run)
                        .await?
                        .is_some()
                    {
                        reclaimed += 1;
                    }
                }
            }
        }

        if reclaimed > 0 {
            info!(reclaimed, "reclaimed expired leases");
        } else {
            debug!("recovery sweep found no expired leases");
        }
        Ok(reclaimed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::store::MemoryJobStore;
    use crate::types::NewJob;
    use chrono::{Duration, Utc};

    fn coordinator(clock: Arc<FixedClock>) -> (LeaseCoordinator, Arc<dyn JobStore>) {
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        (LeaseCoordinator::new(store.clone(), clock), store)
    }

    #[tokio::test]
    async fn heartbeat_by_non_owner_never_mutates_the_row() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let (coord, store) = coordinator(clock.clone());
        let job = store
            .create(NewJob::new("h", serde_json::json!({})))
            .await
            .unwrap();
        coord
            .claim_next("owner", &["default".to_string()], 60)
            .await
            .unwrap();

        let before = store.get(job.id).await.unwrap().unwrap();
        let extended = coord.heartbeat(job.id, "impostor", 60).await.unwrap();
        assert!(!extended);
        let after = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(before.lease_expires_at, after.lease_expires_at);
    }

    #[tokio::test]
    async fn complete_by_non_owner_never_mutates_the_row() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let (coord, store) = coordinator(clock.clone());
        let job = store
            .create(NewJob::new("h", serde_json::json!({})))
            .await
            .unwrap();
        coord
            .claim_next("owner", &["default".to_string()], 60)
            .await
            .unwrap();

        let before = store.get(job.id).await.unwrap().unwrap();
        let completed = coord.complete(job.id, "impostor", true, None).await.unwrap();
        assert!(!completed);
        let after = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(before.status, after.status);
    }

    #[tokio::test]
    async fn boundary_scenario_2_retry_backoff() {
        let t0 = Utc::now();
        let clock = Arc::new(FixedClock::new(t0));
        let (coord, store) = coordinator(clock.clone());
        let job = store
            .create(NewJob::new("h", serde_json::json!({})).max_attempts(5))
            .await
            .unwrap();
        coord
            .claim_next("w1", &["default".to_string()], 60)
            .await
            .unwrap();

        coord.complete(job.id, "w1", false, None).await.unwrap();
        let after_first = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(after_first.attempts, 1);
        assert_eq!(after_first.run_at, t0 + Duration::seconds(5));
        assert_eq!(after_first.status, crate::types::JobStatus::Queued);

        clock.set(t0 + Duration::seconds(5));
        coord
            .claim_next("w1", &["default".to_string()], 60)
            .await
            .unwrap();
        coord.complete(job.id, "w1", false, None).await.unwrap();
        let after_second = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(after_second.attempts, 2);
        assert_eq!(
            after_second.run_at,
            t0 + Duration::seconds(5) + Duration::seconds(10)
        );
    }

    #[tokio::test]
    async fn boundary_scenario_3_dead_on_exhaustion() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let (coord, store) = coordinator(clock.clone());
        let job = store
            .create(NewJob::new("h", serde_json::json!({})).max_attempts(5))
            .await
            .unwrap();
        // Drive attempts to 4 via four failed cycles, then fail once more.
        for _ in 0..4 {
            coord
                .claim_next("w1", &["default".to_string()], 60)
                .await
                .unwrap();
            coord.complete(job.id, "w1", false, None).await.unwrap();
        }
        let before_final = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(before_final.attempts, 4);

        coord
            .claim_next("w1", &["default".to_string()], 60)
            .await
            .unwrap();
        coord.complete(job.id, "w1", false, None).await.unwrap();
        let after = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(after.status, crate::types::JobStatus::Dead);
        assert_eq!(after.attempts, 5);
        assert!(after.last_error.is_some());
    }

    #[tokio::test]
    async fn boundary_scenario_4_lease_recovery() {
        let t0 = Utc::now();
        let clock = Arc::new(FixedClock::new(t0));
        let (coord, store) = coordinator(clock.clone());
        let job = store
            .create(NewJob::new("h", serde_json::json!({})).max_attempts(5))
            .await
            .unwrap();
        coord
            .claim_next("w1", &["default".to_string()], 60)
            .await
            .unwrap();

        clock.set(t0 + Duration::seconds(90));
        let reclaimed = coord.recover_expired().await.unwrap();
        assert_eq!(reclaimed, 1);

        let after = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(after.status, crate::types::JobStatus::Queued);
        assert_eq!(after.attempts, 1);
        assert_eq!(
            after.run_at,
            t0 + Duration::seconds(90) + Duration::seconds(10)
        );
    }

    #[tracing_test::traced_test]
    #[tokio::test]
    async fn recover_expired_logs_the_reclaimed_count() {
        let t0 = Utc::now();
        let clock = Arc::new(FixedClock::new(t0));
        let (coord, store) = coordinator(clock.clone());
        store
            .create(NewJob::new("h", serde_json::json!({})).run_at(t0))
            .await
            .unwrap();
        coord
            .claim_next("w1", &["default".to_string()], 60)
            .await
            .unwrap();

        clock.set(t0 + Duration::seconds(90));
        coord.recover_expired().await.unwrap();
        assert!(logs_contain("reclaimed expired leases"));
    }

    #[tokio::test]
    async fn recover_expired_twice_with_no_workers_is_idempotent() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let (coord, _store) = coordinator(clock);
        assert_eq!(coord.recover_expired().await.unwrap(), 0);
        assert_eq!(coord.recover_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn boundary_scenario_6_cancel_during_execution_wins() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let (coord, store) = coordinator(clock);
        let job = store
            .create(NewJob::new("h", serde_json::json!({})))
            .await
            .unwrap();
        coord
            .claim_next("w1", &["default".to_string()], 60)
            .await
            .unwrap();

        let cancelled = store.cancel(job.id).await.unwrap();
        assert!(cancelled.is_some());

        let completed = coord.complete(job.id, "w1", true, None).await.unwrap();
        assert!(!completed);

        let after = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(after.status, crate::types::JobStatus::Cancelled);
    }
}
