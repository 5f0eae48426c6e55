use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::id::JobId;
use super::status::JobStatus;

/// A single job row. Mirrors the columns in §3 of the data model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub queue: String,
    pub handler: String,
    pub payload: Value,
    pub status: JobStatus,
    pub run_at: DateTime<Utc>,
    pub priority: i32,
    pub max_attempts: i32,
    pub attempts: i32,
    pub timeout_secs: i32,
    pub lease_owner: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// True iff this job entered `running` and currently holds a lease for
    /// `worker_id` (Policy::owns_lease).
    pub fn owns_lease(&self, worker_id: &str) -> bool {
        self.status == JobStatus::Running && self.lease_owner.as_deref() == Some(worker_id)
    }
}

/// Fields supplied by a producer at creation time. Everything else
/// (id, status, attempts, timestamps, lease fields) is assigned by the store.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub queue: String,
    pub handler: String,
    pub payload: Value,
    pub run_at: DateTime<Utc>,
    pub priority: i32,
    pub max_attempts: i32,
    pub timeout_secs: i32,
}

impl NewJob {
    /// A job eligible to run immediately, on the default queue, at normal
    /// priority, with the repository's default retry/timeout budget.
    pub fn new(handler: impl Into<String>, payload: Value) -> Self {
        Self {
            queue: "default".to_string(),
            handler: handler.into(),
            payload,
            run_at: Utc::now(),
            priority: 0,
            max_attempts: 5,
            timeout_secs: 300,
        }
    }

    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    pub fn run_at(mut self, run_at: DateTime<Utc>) -> Self {
        self.run_at = run_at;
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn timeout_secs(mut self, timeout_secs: i32) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}

/// The admin-editable subset of a job's fields (§6 Admin API `update`).
/// `None` means leave the field unchanged.
#[derive(Debug, Clone, Default)]
pub struct JobFieldUpdate {
    pub priority: Option<i32>,
    pub run_at: Option<DateTime<Utc>>,
    pub max_attempts: Option<i32>,
    pub timeout_secs: Option<i32>,
}
