//! The only component that touches persistent storage (§4.2). Exposes the
//! two claim-path queries and the seven named state transitions; everything
//! else in the crate is built on top of this trait.

mod memory;
#[cfg(feature = "postgres")]
mod postgres;

pub use memory::MemoryJobStore;
#[cfg(feature = "postgres")]
pub use postgres::PgJobStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::QueueResult;
use crate::types::{Job, JobFieldUpdate, JobFilter, JobId, NewJob, Page};

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn get(&self, id: JobId) -> QueueResult<Option<Job>>;

    async fn create(&self, fields: NewJob) -> QueueResult<Job>;

    async fn list(&self, filter: &JobFilter, offset: i64, limit: i64) -> QueueResult<Page<Job>>;

    /// Mutate the admin-editable field subset (priority, run_at,
    /// max_attempts, timeout_secs). Returns `None` if the job doesn't exist.
    async fn update_fields(&self, id: JobId, update: JobFieldUpdate) -> QueueResult<Option<Job>>;

    async fn delete(&self, id: JobId) -> QueueResult<bool>;

    /// Row-locked read of the next claimable job, without transitioning it.
    /// Restricted to `queue ∈ queues`, `status ∈ {queued, scheduled}`,
    /// `run_at ≤ now`; ordered by `priority DESC, run_at ASC, created_at ASC`.
    /// Exposed as an independently testable primitive (ordering invariants);
    /// the actual claim path uses [`JobStore::claim_next`], which performs
    /// the equivalent locked read and the `running` transition as one
    /// atomic operation so the lock is never released between the two.
    async fn find_next_runnable(
        &self,
        queues: &[String],
        now: DateTime<Utc>,
    ) -> QueueResult<Option<Job>>;

    /// All rows with `status = running ∧ lease_expires_at < now`.
    async fn find_expired_leases(&self, now: DateTime<Utc>) -> QueueResult<Vec<Job>>;

    /// Atomically finds the next runnable job among `queues` and transitions
    /// it to `running` with a fresh lease for `worker_id`, in one operation
    /// (`SELECT ... FOR UPDATE SKIP LOCKED` immediately followed by the
    /// `UPDATE`, on the Postgres backend). This is what
    /// [`crate::lease::LeaseCoordinator::claim_next`] actually calls.
    async fn claim_next(
        &self,
        worker_id: &str,
        queues: &[String],
        now: DateTime<Utc>,
        lease_seconds: i64,
    ) -> QueueResult<Option<Job>>;

    async fn set_running(
        &self,
        id: JobId,
        owner: &str,
        expires_at: DateTime<Utc>,
        heartbeat_at: DateTime<Utc>,
    ) -> QueueResult<bool>;

    /// Extends the lease iff `id` is `running` and owned by `owner`.
    async fn set_heartbeat(
        &self,
        id: JobId,
        owner: &str,
        expires_at: DateTime<Utc>,
        heartbeat_at: DateTime<Utc>,
    ) -> QueueResult<bool>;

    async fn set_succeeded(&self, id: JobId, owner: &str) -> QueueResult<bool>;

    async fn set_failed(&self, id: JobId, owner: &str, error: &str) -> QueueResult<bool>;

    async fn set_dead(&self, id: JobId, owner: &str, error: &str) -> QueueResult<bool>;

    /// Re-queues `id` from `failed` or `running` with a new `run_at`,
    /// clearing lease fields. A standalone named transition per §4.2; the
    /// coordinator's own retry path uses the combined
    /// [`set_retry_after_failure`] instead so the attempts increment and
    /// the status change land in one round trip.
    ///
    /// [`set_retry_after_failure`]: JobStore::set_retry_after_failure
    async fn set_queued_for_retry(&self, id: JobId, run_at: DateTime<Utc>) -> QueueResult<bool>;

    /// Increments `attempts` by one and returns the new value. Returns
    /// `None` if the job doesn't exist.
    async fn increment_attempts(&self, id: JobId) -> QueueResult<Option<i32>>;

    /// Atomically increments `attempts`, transitions `running -> queued`
    /// with a new `run_at`, and clears the lease, in one store round trip.
    /// When `owner` is `Some`, the row must also be currently leased to that
    /// owner (the `Complete` RETRY path); `None` skips the ownership check
    /// (the `RecoverExpired` path, which has already established the lease
    /// is stale via `find_expired_leases` and doesn't care who held it).
    /// `error`, when `Some`, overwrites `last_error`; `None` leaves it
    /// untouched (recovery doesn't stamp a message of its own). Returns the
    /// post-increment attempts count, or `None` if the guard didn't match.
    async fn set_retry_after_failure(
        &self,
        id: JobId,
        owner: Option<&str>,
        error: Option<&str>,
        run_at: DateTime<Utc>,
    ) -> QueueResult<Option<i32>>;

    /// Same guard semantics as [`set_retry_after_failure`], but transitions
    /// `running -> dead` instead, always stamping `error`.
    async fn set_dead_after_failure(
        &self,
        id: JobId,
        owner: Option<&str>,
        error: &str,
    ) -> QueueResult<Option<i32>>;

    /// Cancel `id` unless it is already in a terminal state. Returns the
    /// updated job, or `None` if the job doesn't exist or was already
    /// terminal (a no-op, per the round-trip property in §8).
    async fn cancel(&self, id: JobId) -> QueueResult<Option<Job>>;

    /// Reset `id` to `queued` from `failed`/`dead` only: `attempts := 0`,
    /// `last_error := null`, lease fields cleared, `run_at := now`.
    async fn retry(&self, id: JobId, now: DateTime<Utc>) -> QueueResult<Option<Job>>;
}
