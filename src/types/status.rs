use serde::{Deserialize, Serialize};

/// Job lifecycle status. See the state machine in the crate root docs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(
    feature = "postgres",
    derive(sqlx::Type),
    sqlx(type_name = "job_status", rename_all = "snake_case")
)]
pub enum JobStatus {
    /// Future-dated; not yet eligible for claim. A convenience label: the
    /// claim query treats this identically to `Queued` once `run_at` passes.
    Scheduled,
    /// Eligible for claim now.
    Queued,
    /// Claimed by a worker; `lease_owner`/`lease_expires_at` are set.
    Running,
    /// Terminal: handler returned success.
    Succeeded,
    /// Transient: handler raised and retries remain. Immediately followed
    /// by a transition back to `Queued` within the same Complete call.
    Failed,
    /// Terminal: user-initiated cancellation.
    Cancelled,
    /// Terminal: handler raised with no retries remaining, or lease
    /// recovery exhausted retries.
    Dead,
}

impl JobStatus {
    /// Terminal statuses only leave themselves via an explicit `retry` call.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Cancelled | Self::Dead)
    }

    /// Statuses the claim query considers eligible once `run_at <= now`.
    pub fn is_claimable_kind(self) -> bool {
        matches!(self, Self::Queued | Self::Scheduled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Dead => "dead",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
