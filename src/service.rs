//! Non-HTTP CRUD/cancel/retry surface over a [`JobStore`], for embedding
//! directly or mounting behind an admin API. Orchestration only — all of
//! the actual precondition logic (what's cancellable, what's retriable)
//! lives in the store so it applies uniformly regardless of caller.

use std::sync::Arc;

use tracing::instrument;

use crate::clock::Clock;
use crate::error::QueueResult;
use crate::store::JobStore;
use crate::types::{Job, JobFieldUpdate, JobFilter, JobId, NewJob, Page};

pub struct JobService {
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
}

impl JobService {
    pub fn new(store: Arc<dyn JobStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    #[instrument(skip(self, fields), fields(handler = %fields.handler))]
    pub async fn create_job(&self, fields: NewJob) -> QueueResult<Job> {
        self.store.create(fields).await
    }

    pub async fn get_job(&self, id: JobId) -> QueueResult<Option<Job>> {
        self.store.get(id).await
    }

    pub async fn list_jobs(&self, filter: &JobFilter, offset: i64, limit: i64) -> QueueResult<Page<Job>> {
        self.store.list(filter, offset, limit).await
    }

    pub async fn update_job(&self, id: JobId, update: JobFieldUpdate) -> QueueResult<Option<Job>> {
        self.store.update_fields(id, update).await
    }

    pub async fn delete_job(&self, id: JobId) -> QueueResult<bool> {
        self.store.delete(id).await
    }

    /// Cancels a job unless it is already in a terminal state. Returns
    /// `None` if the job doesn't exist or is not cancellable.
    #[instrument(skip(self))]
    pub async fn cancel_job(&self, id: JobId) -> QueueResult<Option<Job>> {
        self.store.cancel(id).await
    }

    /// Retries a `failed` or `dead` job: resets `attempts` to zero, clears
    /// `last_error` and any lease fields, and sets `run_at` to now. Returns
    /// `None` if the job doesn't exist or is not in a retriable state.
    #[instrument(skip(self))]
    pub async fn retry_job(&self, id: JobId) -> QueueResult<Option<Job>> {
        let now = self.clock.now();
        self.store.retry(id, now).await
    }
}
