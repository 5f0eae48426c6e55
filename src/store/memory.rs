//! In-process `JobStore`, used for tests and local development. A single
//! mutex serializes all access, which is a strictly stronger guarantee than
//! `SELECT ... FOR UPDATE SKIP LOCKED` needs to provide, so no explicit
//! row-locking machinery is needed here — the lock scope itself is the
//! "transaction".

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::error::QueueResult;
use crate::types::{Job, JobFieldUpdate, JobFilter, JobId, JobStatus, NewJob, Page};

use super::JobStore;

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<JobId, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn matches(filter: &JobFilter, job: &Job) -> bool {
        if let Some(queue) = &filter.queue {
            if &job.queue != queue {
                return false;
            }
        }
        if let Some(handler) = &filter.handler {
            if &job.handler != handler {
                return false;
            }
        }
        if let Some(status) = filter.status {
            if job.status != status {
                return false;
            }
        }
        true
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn get(&self, id: JobId) -> QueueResult<Option<Job>> {
        Ok(self.jobs.lock().get(&id).cloned())
    }

    async fn create(&self, fields: NewJob) -> QueueResult<Job> {
        let now = Utc::now();
        let status = if fields.run_at <= now {
            JobStatus::Queued
        } else {
            JobStatus::Scheduled
        };
        let job = Job {
            id: JobId::new(),
            queue: fields.queue,
            handler: fields.handler,
            payload: fields.payload,
            status,
            run_at: fields.run_at,
            priority: fields.priority,
            max_attempts: fields.max_attempts,
            attempts: 0,
            timeout_secs: fields.timeout_secs,
            lease_owner: None,
            lease_expires_at: None,
            heartbeat_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        self.jobs.lock().insert(job.id, job.clone());
        Ok(job)
    }

    async fn list(&self, filter: &JobFilter, offset: i64, limit: i64) -> QueueResult<Page<Job>> {
        let jobs = self.jobs.lock();
        let mut matching: Vec<Job> = jobs
            .values()
            .filter(|j| Self::matches(filter, j))
            .cloned()
            .collect();
        matching.sort_by_key(|j| j.created_at);
        let total = matching.len() as i64;
        let items = matching
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();
        Ok(Page { items, total })
    }

    async fn update_fields(&self, id: JobId, update: JobFieldUpdate) -> QueueResult<Option<Job>> {
        let mut jobs = self.jobs.lock();
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(priority) = update.priority {
            job.priority = priority;
        }
        if let Some(run_at) = update.run_at {
            job.run_at = run_at;
        }
        if let Some(max_attempts) = update.max_attempts {
            job.max_attempts = max_attempts;
        }
        if let Some(timeout_secs) = update.timeout_secs {
            job.timeout_secs = timeout_secs;
        }
        job.updated_at = Utc::now();
        Ok(Some(job.clone()))
    }

    async fn delete(&self, id: JobId) -> QueueResult<bool> {
        Ok(self.jobs.lock().remove(&id).is_some())
    }

    async fn find_next_runnable(
        &self,
        queues: &[String],
        now: DateTime<Utc>,
    ) -> QueueResult<Option<Job>> {
        Ok(find_next_runnable_locked(&self.jobs.lock(), queues, now))
    }

    async fn find_expired_leases(&self, now: DateTime<Utc>) -> QueueResult<Vec<Job>> {
        let jobs = self.jobs.lock();
        let mut expired: Vec<Job> = jobs
            .values()
            .filter(|j| {
                j.status == JobStatus::Running
                    && j.lease_expires_at.map(|exp| exp < now).unwrap_or(true)
            })
            .cloned()
            .collect();
        expired.sort_by_key(|j| j.id);
        Ok(expired)
    }

    async fn claim_next(
        &self,
        worker_id: &str,
        queues: &[String],
        now: DateTime<Utc>,
        lease_seconds: i64,
    ) -> QueueResult<Option<Job>> {
        let mut jobs = self.jobs.lock();
        let candidate_id = find_next_runnable_locked(&jobs, queues, now).map(|j| j.id);
        let Some(id) = candidate_id else {
            return Ok(None);
        };
        let job = jobs.get_mut(&id).expect("candidate id came from this map");
        job.status = JobStatus::Running;
        job.lease_owner = Some(worker_id.to_string());
        job.lease_expires_at = Some(now + chrono::Duration::seconds(lease_seconds));
        job.heartbeat_at = Some(now);
        job.updated_at = now;
        Ok(Some(job.clone()))
    }

    async fn set_running(
        &self,
        id: JobId,
        owner: &str,
        expires_at: DateTime<Utc>,
        heartbeat_at: DateTime<Utc>,
    ) -> QueueResult<bool> {
        let mut jobs = self.jobs.lock();
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(false);
        };
        if !job.status.is_claimable_kind() {
            return Ok(false);
        }
        job.status = JobStatus::Running;
        job.lease_owner = Some(owner.to_string());
        job.lease_expires_at = Some(expires_at);
        job.heartbeat_at = Some(heartbeat_at);
        job.updated_at = Utc::now();
        Ok(true)
    }

    async fn set_heartbeat(
        &self,
        id: JobId,
        owner: &str,
        expires_at: DateTime<Utc>,
        heartbeat_at: DateTime<Utc>,
    ) -> QueueResult<bool> {
        let mut jobs = self.jobs.lock();
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(false);
        };
        if !job.owns_lease(owner) {
            return Ok(false);
        }
        job.lease_expires_at = Some(expires_at);
        job.heartbeat_at = Some(heartbeat_at);
        job.updated_at = Utc::now();
        Ok(true)
    }

    async fn set_succeeded(&self, id: JobId, owner: &str) -> QueueResult<bool> {
        let mut jobs = self.jobs.lock();
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(false);
        };
        if !job.owns_lease(owner) {
            return Ok(false);
        }
        job.status = JobStatus::Succeeded;
        job.lease_owner = None;
        job.lease_expires_at = None;
        job.updated_at = Utc::now();
        Ok(true)
    }

    async fn set_failed(&self, id: JobId, owner: &str, error: &str) -> QueueResult<bool> {
        let mut jobs = self.jobs.lock();
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(false);
        };
        if !job.owns_lease(owner) {
            return Ok(false);
        }
        job.status = JobStatus::Failed;
        job.last_error = Some(error.to_string());
        job.lease_owner = None;
        job.lease_expires_at = None;
        job.updated_at = Utc::now();
        Ok(true)
    }

    async fn set_dead(&self, id: JobId, owner: &str, error: &str) -> QueueResult<bool> {
        let mut jobs = self.jobs.lock();
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(false);
        };
        if !job.owns_lease(owner) {
            return Ok(false);
        }
        job.status = JobStatus::Dead;
        job.last_error = Some(error.to_string());
        job.lease_owner = None;
        job.lease_expires_at = None;
        job.updated_at = Utc::now();
        Ok(true)
    }

    async fn set_queued_for_retry(&self, id: JobId, run_at: DateTime<Utc>) -> QueueResult<bool> {
        let mut jobs = self.jobs.lock();
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(false);
        };
        // A standalone re-queue primitive: valid from `failed` (a caller
        // that already landed an error separately) or `running` (lease
        // gone stale).
        if !matches!(job.status, JobStatus::Failed | JobStatus::Running) {
            return Ok(false);
        }
        job.status = JobStatus::Queued;
        job.run_at = run_at;
        job.lease_owner = None;
        job.lease_expires_at = None;
        job.updated_at = Utc::now();
        Ok(true)
    }

    async fn increment_attempts(&self, id: JobId) -> QueueResult<Option<i32>> {
        let mut jobs = self.jobs.lock();
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(None);
        };
        job.attempts += 1;
        job.updated_at = Utc::now();
        Ok(Some(job.attempts))
    }

    async fn set_retry_after_failure(
        &self,
        id: JobId,
        owner: Option<&str>,
        error: Option<&str>,
        run_at: DateTime<Utc>,
    ) -> QueueResult<Option<i32>> {
        let mut jobs = self.jobs.lock();
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(None);
        };
        if job.status != JobStatus::Running {
            return Ok(None);
        }
        if let Some(owner) = owner {
            if !job.owns_lease(owner) {
                return Ok(None);
            }
        }
        job.attempts += 1;
        job.status = JobStatus::Queued;
        if let Some(error) = error {
            job.last_error = Some(error.to_string());
        }
        job.run_at = run_at;
        job.lease_owner = None;
        job.lease_expires_at = None;
        job.updated_at = Utc::now();
        Ok(Some(job.attempts))
    }

    async fn set_dead_after_failure(
        &self,
        id: JobId,
        owner: Option<&str>,
        error: &str,
    ) -> QueueResult<Option<i32>> {
        let mut jobs = self.jobs.lock();
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(None);
        };
        if job.status != JobStatus::Running {
            return Ok(None);
        }
        if let Some(owner) = owner {
            if !job.owns_lease(owner) {
                return Ok(None);
            }
        }
        job.attempts += 1;
        job.status = JobStatus::Dead;
        job.last_error = Some(error.to_string());
        job.lease_owner = None;
        job.lease_expires_at = None;
        job.updated_at = Utc::now();
        Ok(Some(job.attempts))
    }

    async fn cancel(&self, id: JobId) -> QueueResult<Option<Job>> {
        let mut jobs = self.jobs.lock();
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(None);
        };
        if job.status.is_terminal() {
            return Ok(None);
        }
        job.status = JobStatus::Cancelled;
        job.lease_owner = None;
        job.lease_expires_at = None;
        job.updated_at = Utc::now();
        Ok(Some(job.clone()))
    }

    async fn retry(&self, id: JobId, now: DateTime<Utc>) -> QueueResult<Option<Job>> {
        let mut jobs = self.jobs.lock();
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(None);
        };
        if !matches!(job.status, JobStatus::Failed | JobStatus::Dead) {
            return Ok(None);
        }
        job.status = JobStatus::Queued;
        job.attempts = 0;
        job.last_error = None;
        job.lease_owner = None;
        job.lease_expires_at = None;
        job.run_at = now;
        job.updated_at = now;
        Ok(Some(job.clone()))
    }
}

/// Shared by `find_next_runnable` and `claim_next`: the ordering/filter
/// predicate from §4.2, applied against an already-locked map.
fn find_next_runnable_locked(
    jobs: &HashMap<JobId, Job>,
    queues: &[String],
    now: DateTime<Utc>,
) -> Option<Job> {
    jobs.values()
        .filter(|j| {
            queues.iter().any(|q| q == &j.queue) && j.status.is_claimable_kind() && j.run_at <= now
        })
        .min_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.run_at.cmp(&b.run_at))
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        })
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn queues(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = MemoryJobStore::new();
        let job = store
            .create(NewJob::new("noop", serde_json::json!({"a": 1})))
            .await
            .unwrap();
        let fetched = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, job.id);
        assert_eq!(fetched.handler, "noop");
        assert_eq!(fetched.status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn boundary_scenario_1_claim_ordering_by_priority() {
        let store = MemoryJobStore::new();
        let t = Utc::now();
        let a = store
            .create(
                NewJob::new("h", serde_json::json!({}))
                    .priority(5)
                    .run_at(t),
            )
            .await
            .unwrap();
        let _b = store
            .create(
                NewJob::new("h", serde_json::json!({}))
                    .priority(1)
                    .run_at(t - Duration::seconds(1)),
            )
            .await
            .unwrap();

        let claimed = store
            .claim_next("w1", &queues(&["default"]), t, 60)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, a.id);
    }

    #[tokio::test]
    async fn scheduled_job_never_overtakes_a_due_queued_job() {
        let store = MemoryJobStore::new();
        let t = Utc::now();
        let due = store
            .create(
                NewJob::new("h", serde_json::json!({}))
                    .priority(0)
                    .run_at(t),
            )
            .await
            .unwrap();
        let _future = store
            .create(
                NewJob::new("h", serde_json::json!({}))
                    .priority(100)
                    .run_at(t + Duration::seconds(60)),
            )
            .await
            .unwrap();

        let claimed = store
            .claim_next("w1", &queues(&["default"]), t, 60)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, due.id);
    }

    #[tokio::test]
    async fn concurrent_claimers_never_receive_the_same_job() {
        use std::sync::Arc;
        let store = Arc::new(MemoryJobStore::new());
        let t = Utc::now();
        store
            .create(NewJob::new("h", serde_json::json!({})).run_at(t))
            .await
            .unwrap();

        let s1 = store.clone();
        let s2 = store.clone();
        let (r1, r2) = tokio::join!(
            s1.claim_next("w1", &queues(&["default"]), t, 60),
            s2.claim_next("w2", &queues(&["default"]), t, 60)
        );
        let winners = [r1.unwrap(), r2.unwrap()];
        let claimed_count = winners.iter().filter(|j| j.is_some()).count();
        assert_eq!(claimed_count, 1);
    }

    #[tokio::test]
    async fn cancel_is_a_no_op_on_an_already_cancelled_job() {
        let store = MemoryJobStore::new();
        let job = store
            .create(NewJob::new("h", serde_json::json!({})))
            .await
            .unwrap();
        assert!(store.cancel(job.id).await.unwrap().is_some());
        assert!(store.cancel(job.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn retry_resets_attempts_and_clears_lease_fields() {
        let store = MemoryJobStore::new();
        let t = Utc::now();
        let job = store
            .create(NewJob::new("h", serde_json::json!({})).run_at(t))
            .await
            .unwrap();
        store
            .claim_next("w1", &queues(&["default"]), t, 60)
            .await
            .unwrap();
        store.set_dead(job.id, "w1", "boom").await.unwrap();

        let retried = store.retry(job.id, t).await.unwrap().unwrap();
        assert_eq!(retried.status, JobStatus::Queued);
        assert_eq!(retried.attempts, 0);
        assert!(retried.last_error.is_none());
        assert!(retried.lease_owner.is_none());
    }

    #[tokio::test]
    async fn set_retry_after_failure_rejects_a_non_owner() {
        let store = MemoryJobStore::new();
        let t = Utc::now();
        store
            .create(NewJob::new("h", serde_json::json!({})).run_at(t))
            .await
            .unwrap();
        let job = store
            .claim_next("w1", &queues(&["default"]), t, 60)
            .await
            .unwrap()
            .unwrap();

        let result = store
            .set_retry_after_failure(job.id, Some("impostor"), Some("boom"), t)
            .await
            .unwrap();
        assert!(result.is_none());
        let unchanged = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(unchanged.status, JobStatus::Running);
    }

    #[tokio::test]
    async fn set_retry_after_failure_increments_and_requeues_in_one_call() {
        let store = MemoryJobStore::new();
        let t = Utc::now();
        let job = store
            .create(NewJob::new("h", serde_json::json!({})).run_at(t))
            .await
            .unwrap();
        store
            .claim_next("w1", &queues(&["default"]), t, 60)
            .await
            .unwrap();

        let next_run = t + Duration::seconds(5);
        let attempts_after = store
            .set_retry_after_failure(job.id, Some("w1"), Some("boom"), next_run)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(attempts_after, 1);

        let after = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(after.status, JobStatus::Queued);
        assert_eq!(after.attempts, 1);
        assert_eq!(after.last_error.as_deref(), Some("boom"));
        assert_eq!(after.run_at, next_run);
        assert!(after.lease_owner.is_none());
    }

    #[tokio::test]
    async fn set_retry_after_failure_with_no_owner_check_leaves_last_error_untouched() {
        let store = MemoryJobStore::new();
        let t = Utc::now();
        let job = store
            .create(NewJob::new("h", serde_json::json!({})).run_at(t))
            .await
            .unwrap();
        store
            .claim_next("w1", &queues(&["default"]), t, 60)
            .await
            .unwrap();

        let next_run = t + Duration::seconds(10);
        store
            .set_retry_after_failure(job.id, None, None, next_run)
            .await
            .unwrap()
            .unwrap();

        let after = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(after.status, JobStatus::Queued);
        assert!(after.last_error.is_none());
    }

    #[tokio::test]
    async fn set_dead_after_failure_increments_attempts_and_transitions_atomically() {
        let store = MemoryJobStore::new();
        let t = Utc::now();
        let job = store
            .create(NewJob::new("h", serde_json::json!({})).run_at(t))
            .await
            .unwrap();
        store
            .claim_next("w1", &queues(&["default"]), t, 60)
            .await
            .unwrap();

        let attempts_after = store
            .set_dead_after_failure(job.id, Some("w1"), "Max attempts exceeded")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(attempts_after, 1);

        let after = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(after.status, JobStatus::Dead);
        assert_eq!(after.last_error.as_deref(), Some("Max attempts exceeded"));
        assert!(after.lease_owner.is_none());
    }
}
