//! Postgres-backed `JobStore`, the production target. Uses
//! `SELECT ... FOR UPDATE SKIP LOCKED` inside a single `UPDATE ... FROM`
//! statement so the row-lock and the `running` transition happen in one
//! round trip and the lock is never released between the two.
//!
//! Expected schema (see `migrations/` in a deploying application — out of
//! scope here per §1):
//!
//! ```sql
//! CREATE TYPE job_status AS ENUM (
//!     'scheduled', 'queued', 'running', 'succeeded', 'failed', 'cancelled', 'dead'
//! );
//!
//! CREATE TABLE jobs (
//!     id                UUID PRIMARY KEY,
//!     queue             TEXT NOT NULL,
//!     handler           TEXT NOT NULL,
//!     payload           JSONB NOT NULL,
//!     status            job_status NOT NULL,
//!     run_at            TIMESTAMPTZ NOT NULL,
//!     priority          INTEGER NOT NULL,
//!     max_attempts      INTEGER NOT NULL,
//!     attempts          INTEGER NOT NULL DEFAULT 0,
//!     timeout_secs      INTEGER NOT NULL,
//!     lease_owner       TEXT,
//!     lease_expires_at  TIMESTAMPTZ,
//!     heartbeat_at      TIMESTAMPTZ,
//!     last_error        TEXT,
//!     created_at        TIMESTAMPTZ NOT NULL DEFAULT now(),
//!     updated_at        TIMESTAMPTZ NOT NULL DEFAULT now()
//! );
//!
//! CREATE INDEX ix_jobs_runnable ON jobs (status, queue, run_at, priority);
//! CREATE INDEX ix_jobs_lease_expiry ON jobs (lease_expires_at) WHERE status = 'running';
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::error::{QueueError, QueueResult};
use crate::types::{Job, JobFieldUpdate, JobFilter, JobId, JobStatus, NewJob, Page};

use super::JobStore;

pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn row_to_job(row: PgRow) -> Job {
    Job {
        id: JobId(row.get("id")),
        queue: row.get("queue"),
        handler: row.get("handler"),
        payload: row.get("payload"),
        status: row.get("status"),
        run_at: row.get("run_at"),
        priority: row.get("priority"),
        max_attempts: row.get("max_attempts"),
        attempts: row.get("attempts"),
        timeout_secs: row.get("timeout_secs"),
        lease_owner: row.get("lease_owner"),
        lease_expires_at: row.get("lease_expires_at"),
        heartbeat_at: row.get("heartbeat_at"),
        last_error: row.get("last_error"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn get(&self, id: JobId) -> QueueResult<Option<Job>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(QueueError::from)?;
        Ok(row.map(row_to_job))
    }

    async fn create(&self, fields: NewJob) -> QueueResult<Job> {
        let id = JobId::new();
        let now = Utc::now();
        let status = if fields.run_at <= now {
            JobStatus::Queued
        } else {
            JobStatus::Scheduled
        };
        let row = sqlx::query(
            r#"
            INSERT INTO jobs (
                id, queue, handler, payload, status, run_at, priority,
                max_attempts, attempts, timeout_secs, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 0, $9, $10, $10)
            RETURNING *
            "#,
        )
        .bind(id.as_uuid())
        .bind(&fields.queue)
        .bind(&fields.handler)
        .bind(&fields.payload)
        .bind(status)
        .bind(fields.run_at)
        .bind(fields.priority)
        .bind(fields.max_attempts)
        .bind(fields.timeout_secs)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(QueueError::from)?;
        Ok(row_to_job(row))
    }

    async fn list(&self, filter: &JobFilter, offset: i64, limit: i64) -> QueueResult<Page<Job>> {
        // Dynamic predicate composition stays simple and injection-safe by
        // binding every optional filter unconditionally and letting `IS NULL`
        // pass the clause through when the caller didn't supply that field.
        let rows = sqlx::query(
            r#"
            SELECT * FROM jobs
            WHERE ($1::text IS NULL OR queue = $1)
              AND ($2::text IS NULL OR handler = $2)
              AND ($3::job_status IS NULL OR status = $3)
            ORDER BY created_at ASC
            OFFSET $4 LIMIT $5
            "#,
        )
        .bind(&filter.queue)
        .bind(&filter.handler)
        .bind(filter.status)
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(QueueError::from)?;

        let total: i64 = sqlx::query(
            r#"
            SELECT COUNT(*) AS count FROM jobs
            WHERE ($1::text IS NULL OR queue = $1)
              AND ($2::text IS NULL OR handler = $2)
              AND ($3::job_status IS NULL OR status = $3)
            "#,
        )
        .bind(&filter.queue)
        .bind(&filter.handler)
        .bind(filter.status)
        .fetch_one(&self.pool)
        .await
        .map_err(QueueError::from)?
        .get("count");

        Ok(Page {
            items: rows.into_iter().map(row_to_job).collect(),
            total,
        })
    }

    async fn update_fields(&self, id: JobId, update: JobFieldUpdate) -> QueueResult<Option<Job>> {
        let row = sqlx::query(
            r#"
            UPDATE jobs SET
                priority = COALESCE($2, priority),
                run_at = COALESCE($3, run_at),
                max_attempts = COALESCE($4, max_attempts),
                timeout_secs = COALESCE($5, timeout_secs),
                updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id.as_uuid())
        .bind(update.priority)
        .bind(update.run_at)
        .bind(update.max_attempts)
        .bind(update.timeout_secs)
        .fetch_optional(&self.pool)
        .await
        .map_err(QueueError::from)?;
        Ok(row.map(row_to_job))
    }

    async fn delete(&self, id: JobId) -> QueueResult<bool> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(QueueError::from)?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_next_runnable(
        &self,
        queues: &[String],
        now: DateTime<Utc>,
    ) -> QueueResult<Option<Job>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM jobs
            WHERE queue = ANY($1)
              AND status IN ('queued', 'scheduled')
              AND run_at <= $2
            ORDER BY priority DESC, run_at ASC, created_at ASC, id ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(queues)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(QueueError::from)?;
        Ok(row.map(row_to_job))
    }

    async fn find_expired_leases(&self, now: DateTime<Utc>) -> QueueResult<Vec<Job>> {
        let rows = sqlx::query(
            "SELECT * FROM jobs WHERE status = 'running' AND lease_expires_at < $1 ORDER BY id",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(QueueError::from)?;
        Ok(rows.into_iter().map(row_to_job).collect())
    }

    async fn claim_next(
        &self,
        worker_id: &str,
        queues: &[String],
        now: DateTime<Utc>,
        lease_seconds: i64,
    ) -> QueueResult<Option<Job>> {
        let expires_at = now + chrono::Duration::seconds(lease_seconds);
        let row = sqlx::query(
            r#"
            WITH claimable AS (
                SELECT id FROM jobs
                WHERE queue = ANY($1)
                  AND status IN ('queued', 'scheduled')
                  AND run_at <= $2
                ORDER BY priority DESC, run_at ASC, created_at ASC, id ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs SET
                status = 'running',
                lease_owner = $3,
                lease_expires_at = $4,
                heartbeat_at = $2,
                updated_at = $2
            WHERE id IN (SELECT id FROM claimable)
            RETURNING *
            "#,
        )
        .bind(queues)
        .bind(now)
        .bind(worker_id)
        .bind(expires_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(QueueError::from)?;
        Ok(row.map(row_to_job))
    }

    async fn set_running(
        &self,
        id: JobId,
        owner: &str,
        expires_at: DateTime<Utc>,
        heartbeat_at: DateTime<Utc>,
    ) -> QueueResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET
                status = 'running', lease_owner = $2, lease_expires_at = $3,
                heartbeat_at = $4, updated_at = $4
            WHERE id = $1 AND status IN ('queued', 'scheduled')
            "#,
        )
        .bind(id.as_uuid())
        .bind(owner)
        .bind(expires_at)
        .bind(heartbeat_at)
        .execute(&self.pool)
        .await
        .map_err(QueueError::from)?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_heartbeat(
        &self,
        id: JobId,
        owner: &str,
        expires_at: DateTime<Utc>,
        heartbeat_at: DateTime<Utc>,
    ) -> QueueResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET lease_expires_at = $3, heartbeat_at = $4, updated_at = $4
            WHERE id = $1 AND status = 'running' AND lease_owner = $2
            "#,
        )
        .bind(id.as_uuid())
        .bind(owner)
        .bind(expires_at)
        .bind(heartbeat_at)
        .execute(&self.pool)
        .await
        .map_err(QueueError::from)?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_succeeded(&self, id: JobId, owner: &str) -> QueueResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET
                status = 'succeeded', lease_owner = NULL, lease_expires_at = NULL,
                updated_at = now()
            WHERE id = $1 AND status = 'running' AND lease_owner = $2
            "#,
        )
        .bind(id.as_uuid())
        .bind(owner)
        .execute(&self.pool)
        .await
        .map_err(QueueError::from)?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_failed(&self, id: JobId, owner: &str, error: &str) -> QueueResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET
                status = 'failed', last_error = $3, lease_owner = NULL,
                lease_expires_at = NULL, updated_at = now()
            WHERE id = $1 AND status = 'running' AND lease_owner = $2
            "#,
        )
        .bind(id.as_uuid())
        .bind(owner)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(QueueError::from)?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_dead(&self, id: JobId, owner: &str, error: &str) -> QueueResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET
                status = 'dead', last_error = $3, lease_owner = NULL,
                lease_expires_at = NULL, updated_at = now()
            WHERE id = $1 AND status = 'running' AND lease_owner = $2
            "#,
        )
        .bind(id.as_uuid())
        .bind(owner)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(QueueError::from)?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_queued_for_retry(&self, id: JobId, run_at: DateTime<Utc>) -> QueueResult<bool> {
        // A standalone re-queue primitive: valid from `failed` (a caller
        // that already landed an error separately) or `running` (lease
        // gone stale). `LeaseCoordinator` itself goes through the combined
        // `set_retry_after_failure` instead.
        let result = sqlx::query(
            r#"
            UPDATE jobs SET
                status = 'queued', run_at = $2, lease_owner = NULL,
                lease_expires_at = NULL, updated_at = now()
            WHERE id = $1 AND status IN ('failed', 'running')
            "#,
        )
        .bind(id.as_uuid())
        .bind(run_at)
        .execute(&self.pool)
        .await
        .map_err(QueueError::from)?;
        Ok(result.rows_affected() > 0)
    }

    async fn increment_attempts(&self, id: JobId) -> QueueResult<Option<i32>> {
        let row = sqlx::query(
            "UPDATE jobs SET attempts = attempts + 1, updated_at = now() WHERE id = $1 RETURNING attempts",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(QueueError::from)?;
        Ok(row.map(|r| r.get("attempts")))
    }

    async fn set_retry_after_failure(
        &self,
        id: JobId,
        owner: Option<&str>,
        error: Option<&str>,
        run_at: DateTime<Utc>,
    ) -> QueueResult<Option<i32>> {
        let row = sqlx::query(
            r#"
            UPDATE jobs SET
                attempts = attempts + 1,
                status = 'queued',
                last_error = COALESCE($3, last_error),
                run_at = $4,
                lease_owner = NULL,
                lease_expires_at = NULL,
                updated_at = now()
            WHERE id = $1
              AND status = 'running'
              AND ($2::text IS NULL OR lease_owner = $2)
            RETURNING attempts
            "#,
        )
        .bind(id.as_uuid())
        .bind(owner)
        .bind(error)
        .bind(run_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(QueueError::from)?;
        Ok(row.map(|r| r.get("attempts")))
    }

    async fn set_dead_after_failure(
        &self,
        id: JobId,
        owner: Option<&str>,
        error: &str,
    ) -> QueueResult<Option<i32>> {
        let row = sqlx::query(
            r#"
            UPDATE jobs SET
                attempts = attempts + 1,
                status = 'dead',
                last_error = $3,
                lease_owner = NULL,
                lease_expires_at = NULL,
                updated_at = now()
            WHERE id = $1
              AND status = 'running'
              AND ($2::text IS NULL OR lease_owner = $2)
            RETURNING attempts
            "#,
        )
        .bind(id.as_uuid())
        .bind(owner)
        .bind(error)
        .fetch_optional(&self.pool)
        .await
        .map_err(QueueError::from)?;
        Ok(row.map(|r| r.get("attempts")))
    }

    async fn cancel(&self, id: JobId) -> QueueResult<Option<Job>> {
        let row = sqlx::query(
            r#"
            UPDATE jobs SET
                status = 'cancelled', lease_owner = NULL, lease_expires_at = NULL,
                updated_at = now()
            WHERE id = $1 AND status NOT IN ('succeeded', 'failed', 'dead', 'cancelled')
            RETURNING *
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(QueueError::from)?;
        Ok(row.map(row_to_job))
    }

    async fn retry(&self, id: JobId, now: DateTime<Utc>) -> QueueResult<Option<Job>> {
        let row = sqlx::query(
            r#"
            UPDATE jobs SET
                status = 'queued', attempts = 0, last_error = NULL,
                lease_owner = NULL, lease_expires_at = NULL,
                run_at = $2, updated_at = $2
            WHERE id = $1 AND status IN ('failed', 'dead')
            RETURNING *
            "#,
        )
        .bind(id.as_uuid())
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(QueueError::from)?;
        Ok(row.map(row_to_job))
    }
}
