//! # leasequeue: a durable, at-least-once job queue
//!
//! A job is a row: claim it, lease it, run it, report back. No broker, no
//! separate scheduler process — the relational store you already run is the
//! coordination point, and row-level locking (`SELECT ... FOR UPDATE SKIP
//! LOCKED` on Postgres) is the only mutual-exclusion primitive.
//!
//! ## Core pieces
//!
//! - [`store`] — the [`store::JobStore`] trait and its two implementations:
//!   [`store::MemoryJobStore`] for tests, [`store::PgJobStore`] behind the
//!   `postgres` feature for production.
//! - [`lease`] — [`lease::LeaseCoordinator`] composes the store with
//!   [`policy`]'s pure decision functions into claim/heartbeat/complete/
//!   recover.
//! - [`registry`] and [`executor`] — name a handler, register it, and run
//!   it against a job's payload.
//! - [`worker`] and [`scheduler`] — the two background loops: one polls for
//!   work, the other reclaims leases abandoned by dead workers.
//! - [`service`] — plain CRUD/cancel/retry surface for embedding behind
//!   your own admin API.
//!
//! ## Quick start
//!
//! ```rust
//! use leasequeue::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn run() -> QueueResult<()> {
//! let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
//! let clock = Arc::new(SystemClock);
//! let lease = Arc::new(LeaseCoordinator::new(store.clone(), clock.clone()));
//!
//! let mut registry = HandlerRegistry::new();
//! registry.register(
//!     "send_email",
//!     |payload| async move {
//!         println!("sending: {payload}");
//!         Ok(())
//!     },
//!     HandlerMetadata::default(),
//! ).unwrap();
//! let executor = Arc::new(Executor::new(registry));
//!
//! store.create(NewJob::new("send_email", serde_json::json!({"to": "a@b.com"}))).await?;
//!
//! let worker = Worker::new(
//!     WorkerConfig::new("worker-1", vec!["default".to_string()]),
//!     lease,
//!     executor,
//! );
//! let handle = worker.spawn();
//! handle.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod error;
pub mod executor;
pub mod lease;
pub mod policy;
pub mod registry;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod types;
pub mod worker;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{QueueError, QueueResult, StorageError};
pub use executor::{ExecutionResult, Executor};
pub use lease::LeaseCoordinator;
pub use registry::{Handler, HandlerError, HandlerMetadata, HandlerRegistry};
pub use scheduler::{RecoveryScheduler, SchedulerConfig, SchedulerHandle};
pub use service::JobService;
pub use store::{JobStore, MemoryJobStore};
#[cfg(feature = "postgres")]
pub use store::PgJobStore;
pub use types::{Job, JobFieldUpdate, JobFilter, JobId, JobStatus, NewJob, Page};
pub use worker::{Worker, WorkerConfig, WorkerHandle, WorkerStats};

/// Everything you need to wire up a worker or an admin surface.
pub mod prelude {
    pub use crate::{
        Clock, ExecutionResult, Executor, FixedClock, Handler, HandlerError, HandlerMetadata,
        HandlerRegistry, Job, JobFieldUpdate, JobFilter, JobId, JobService, JobStatus, JobStore,
        LeaseCoordinator, MemoryJobStore, NewJob, Page, QueueError, QueueResult,
        RecoveryScheduler, SchedulerConfig, StorageError, SystemClock, Worker, WorkerConfig,
        WorkerStats,
    };

    #[cfg(feature = "postgres")]
    pub use crate::PgJobStore;
}
