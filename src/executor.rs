//! Resolves a job's handler by name and invokes it, converting a raised
//! failure into a structured result. No store I/O happens here: the
//! executor does not heartbeat and does not know about leases.

use std::time::Instant;

use tracing::{instrument, warn};

use crate::registry::HandlerRegistry;
use crate::types::Job;

/// Outcome of running a job's handler once.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub success: bool,
    pub error_message: Option<String>,
    pub duration_seconds: Option<f64>,
}

impl ExecutionResult {
    fn success(duration_seconds: f64) -> Self {
        Self {
            success: true,
            error_message: None,
            duration_seconds: Some(duration_seconds),
        }
    }

    fn failure(message: String, duration_seconds: Option<f64>) -> Self {
        Self {
            success: false,
            error_message: Some(message),
            duration_seconds,
        }
    }
}

pub struct Executor {
    registry: HandlerRegistry,
}

impl Executor {
    pub fn new(registry: HandlerRegistry) -> Self {
        Self { registry }
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, handler = %job.handler))]
    pub async fn execute(&self, job: &Job) -> ExecutionResult {
        let Some(handler) = self.registry.get(&job.handler) else {
            let available = self.registry.list().join(", ");
            let message = format!(
                "Handler '{}' not registered. Available: [{}]",
                job.handler, available
            );
            warn!(%message, "handler registry miss");
            return ExecutionResult::failure(message, None);
        };

        let started = Instant::now();
        let outcome = handler.call(job.payload.clone()).await;
        let duration_seconds = started.elapsed().as_secs_f64();

        match outcome {
            Ok(()) => ExecutionResult::success(duration_seconds),
            Err(err) => ExecutionResult::failure(err.to_string(), Some(duration_seconds)),
        }
    }
}
