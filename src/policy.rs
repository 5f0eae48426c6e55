//! Pure decision functions underlying the claim/lease/complete/recover state
//! machine. No I/O; every function is a deterministic projection of its
//! arguments, which is what makes the property tests in `tests/policy.rs`
//! possible without a store.

use chrono::{DateTime, Duration, Utc};

use crate::types::{Job, JobStatus};

const BASE_BACKOFF_SECS: i64 = 5;
const MAX_BACKOFF_SECS: i64 = 3600;

/// `now + lease_seconds`.
pub fn compute_lease_expiry(now: DateTime<Utc>, lease_seconds: i64) -> DateTime<Utc> {
    now + Duration::seconds(lease_seconds)
}

/// `min(base * 2^attempts, max_delay)`. `attempts` is the count *after*
/// increment: the number of failures so far including the current one.
pub fn retry_delay(attempts: i32) -> Duration {
    let exponent = attempts.max(0) as u32;
    let secs = BASE_BACKOFF_SECS.saturating_mul(2i64.saturating_pow(exponent));
    Duration::seconds(secs.min(MAX_BACKOFF_SECS))
}

/// `now + retry_delay(attempts)`.
pub fn compute_next_run_at(now: DateTime<Utc>, attempts: i32) -> DateTime<Utc> {
    now + retry_delay(attempts)
}

/// True iff `job` is in a claimable status and its `run_at` has passed.
pub fn can_claim(job: &Job, now: DateTime<Utc>) -> bool {
    job.status.is_claimable_kind() && job.run_at <= now
}

/// True iff `job` is running and leased by `worker_id`.
pub fn owns_lease(job: &Job, worker_id: &str) -> bool {
    job.owns_lease(worker_id)
}

/// True iff the job's lease has no expiry stamped, or it has passed.
pub fn is_lease_expired(job: &Job, now: DateTime<Utc>) -> bool {
    match job.lease_expires_at {
        Some(expires_at) => expires_at < now,
        None => true,
    }
}

/// True iff the job has not yet exhausted its retry budget.
pub fn has_retries_remaining(job: &Job) -> bool {
    job.attempts < job.max_attempts
}

/// Outcome of a Complete call, computed *before* attempts is incremented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    Succeeded,
    Retry,
    Dead,
}

/// Decide the outcome of completing `job` with the given success flag.
///
/// The `+1` against `max_attempts` is deliberate: the decision must be made
/// before the caller increments `attempts`, so the increment and the status
/// change land in the same transaction.
pub fn decide_completion(job: &Job, success: bool) -> CompletionOutcome {
    if success {
        return CompletionOutcome::Succeeded;
    }
    if job.attempts + 1 >= job.max_attempts {
        CompletionOutcome::Dead
    } else {
        CompletionOutcome::Retry
    }
}

/// Same decision as [`decide_completion`] but driven by raw counters, for
/// callers (e.g. recovery) that don't have a `success` flag — a lease
/// expiry is always treated as a failed attempt.
pub fn decide_recovery(attempts: i32, max_attempts: i32) -> CompletionOutcome {
    if attempts + 1 >= max_attempts {
        CompletionOutcome::Dead
    } else {
        CompletionOutcome::Retry
    }
}
