//! Postgres-backed job store.
//!
//! Each job is one row in `jobs`; the full [`Job`] lives in the `body` JSONB
//! column, with `status`, `scheduled_at` and `lease_expires_at` mirrored into
//! plain columns so the claim query can filter and lock without decoding JSON.
//! Claims use `FOR UPDATE SKIP LOCKED`, so several executors may share a table
//! without handing out the same job twice.
//!
//! The [`JobStore`] trait is synchronous. Calls are bridged onto the tokio
//! runtime captured at construction, which means they must be made from a
//! plain thread or a `spawn_blocking` task, never from inside an async task.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use tokio::runtime::Handle;
use tracing::instrument;

use super::store::{JobStats, JobStore, JobStoreError, lease_expired_error};
use super::types::{DeadLetterEntry, Job, JobId, JobStatus};

#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: PgPool,
    runtime: Handle,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool, runtime: Handle) -> Self {
        Self { pool, runtime }
    }

    fn block_on<F: Future>(&self, fut: F) -> F::Output {
        self.runtime.block_on(fut)
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, kind = job.kind.type_name()), err)]
    pub async fn insert_job(&self, job: &Job) -> Result<JobId, JobStoreError> {
        sqlx::query(
            r#"
            INSERT INTO jobs (id, kind, status, body, created_at, scheduled_at, lease_expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(job.id.0)
        .bind(job.kind.type_name())
        .bind(job.status.label())
        .bind(encode(job)?)
        .bind(job.created_at)
        .bind(job.scheduled_at)
        .bind(job.lease_expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                JobStoreError::AlreadyExists(job.id)
            } else {
                map_sqlx_error("insert_job", e)
            }
        })?;
        Ok(job.id)
    }

    pub async fn fetch_job(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        let body: Option<serde_json::Value> =
            sqlx::query_scalar("SELECT body FROM jobs WHERE id = $1")
                .bind(job_id.0)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("fetch_job", e))?;
        body.map(decode).transpose()
    }

    pub async fn save_job(&self, job: &Job) -> Result<(), JobStoreError> {
        let mut tx = self.begin().await?;
        save_in_tx(&mut tx, job).await?;
        commit(tx).await
    }

    #[instrument(skip(self), err)]
    pub async fn claim_job(&self, lease: Duration) -> Result<Option<Job>, JobStoreError> {
        let mut tx = self.begin().await?;

        let body: Option<serde_json::Value> = sqlx::query_scalar(
            r#"
            SELECT body FROM jobs
            WHERE status IN ('pending', 'failed')
              AND (scheduled_at IS NULL OR scheduled_at <= $1)
            ORDER BY created_at ASC, id ASC
            FOR UPDATE SKIP LOCKED
            LIMIT 1
            "#,
        )
        .bind(Utc::now())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("claim_job", e))?;

        let Some(body) = body else {
            commit(tx).await?;
            return Ok(None);
        };

        let mut job = decode(body)?;
        job.mark_running(lease);
        save_in_tx(&mut tx, &job).await?;
        commit(tx).await?;
        Ok(Some(job))
    }

    pub async fn delete_completed(&self, job: &Job) -> Result<(), JobStoreError> {
        let mut tx = self.begin().await?;

        let deleted = sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(job.id.0)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_completed", e))?;
        if deleted.rows_affected() == 0 {
            return Err(JobStoreError::NotFound(job.id));
        }

        sqlx::query(
            r#"
            INSERT INTO job_counters (name, value) VALUES ('completed', 1)
            ON CONFLICT (name) DO UPDATE SET value = job_counters.value + 1
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("delete_completed", e))?;

        commit(tx).await
    }

    pub async fn move_to_dead_letter(
        &self,
        mut job: Job,
        reason: String,
    ) -> Result<(), JobStoreError> {
        job.status = JobStatus::DeadLettered {
            error: reason.clone(),
            attempts: job.attempt,
        };
        job.updated_at = Utc::now();
        job.lease_expires_at = None;

        let mut tx = self.begin().await?;
        dead_letter_in_tx(&mut tx, DeadLetterEntry::new(job, reason)).await?;
        commit(tx).await
    }

    #[instrument(skip(self), err)]
    pub async fn reap_leases(&self, now: DateTime<Utc>) -> Result<Vec<Job>, JobStoreError> {
        let mut tx = self.begin().await?;

        let bodies: Vec<serde_json::Value> = sqlx::query_scalar(
            r#"
            SELECT body FROM jobs
            WHERE status = 'running' AND lease_expires_at <= $1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(now)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("reap_leases", e))?;

        let error = lease_expired_error();
        let mut abandoned = Vec::new();
        for body in bodies {
            let mut job = decode(body)?;
            let started = job.updated_at;
            job.mark_failed(&error, started);
            if matches!(job.status, JobStatus::DeadLettered { .. }) {
                dead_letter_in_tx(
                    &mut tx,
                    DeadLetterEntry::new(job.clone(), error.message.clone()),
                )
                .await?;
                abandoned.push(job);
            } else {
                save_in_tx(&mut tx, &job).await?;
            }
        }

        commit(tx).await?;
        Ok(abandoned)
    }

    pub async fn load_dead_letters(
        &self,
        limit: usize,
    ) -> Result<Vec<DeadLetterEntry>, JobStoreError> {
        let rows: Vec<(serde_json::Value, String, DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT body, reason, dead_lettered_at FROM dead_letter_jobs
            ORDER BY dead_lettered_at ASC
            LIMIT $1
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_dead_letters", e))?;

        rows.into_iter()
            .map(|(body, reason, dead_lettered_at)| {
                Ok(DeadLetterEntry {
                    job: decode(body)?,
                    dead_lettered_at,
                    reason,
                })
            })
            .collect()
    }

    pub async fn requeue_dead_letter(&self, job_id: JobId) -> Result<Job, JobStoreError> {
        let mut tx = self.begin().await?;

        let body: Option<serde_json::Value> =
            sqlx::query_scalar("DELETE FROM dead_letter_jobs WHERE id = $1 RETURNING body")
                .bind(job_id.0)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("requeue_dead_letter", e))?;
        let body = body.ok_or(JobStoreError::NotFound(job_id))?;

        let mut job = decode(body)?;
        job.status = JobStatus::Pending;
        job.attempt = 0;
        job.scheduled_at = None;
        job.lease_expires_at = None;
        job.updated_at = Utc::now();
        job.history.clear();

        sqlx::query(
            r#"
            INSERT INTO jobs (id, kind, status, body, created_at, scheduled_at, lease_expires_at)
            VALUES ($1, $2, $3, $4, $5, NULL, NULL)
            "#,
        )
        .bind(job.id.0)
        .bind(job.kind.type_name())
        .bind(job.status.label())
        .bind(encode(&job)?)
        .bind(job.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("requeue_dead_letter", e))?;

        commit(tx).await?;
        Ok(job)
    }

    pub async fn load_stats(&self) -> Result<JobStats, JobStoreError> {
        let by_status: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM jobs GROUP BY status")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("load_stats", e))?;

        let dead_lettered: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM dead_letter_jobs")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_stats", e))?;

        let completed: Option<i64> =
            sqlx::query_scalar("SELECT value FROM job_counters WHERE name = 'completed'")
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("load_stats", e))?;

        let mut stats = JobStats {
            completed: completed.unwrap_or(0).max(0) as u64,
            dead_lettered: dead_lettered.max(0) as usize,
            ..JobStats::default()
        };
        for (status, count) in by_status {
            let count = count.max(0) as usize;
            match status.as_str() {
                "pending" => stats.pending += count,
                "running" => stats.running += count,
                "failed" => stats.failed += count,
                _ => {}
            }
        }
        Ok(stats)
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, JobStoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))
    }
}

async fn save_in_tx(tx: &mut Transaction<'_, Postgres>, job: &Job) -> Result<(), JobStoreError> {
    let updated = sqlx::query(
        r#"
        UPDATE jobs
        SET status = $2, body = $3, scheduled_at = $4, lease_expires_at = $5
        WHERE id = $1
        "#,
    )
    .bind(job.id.0)
    .bind(job.status.label())
    .bind(encode(job)?)
    .bind(job.scheduled_at)
    .bind(job.lease_expires_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("save_job", e))?;

    if updated.rows_affected() == 0 {
        return Err(JobStoreError::NotFound(job.id));
    }
    Ok(())
}

async fn dead_letter_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    entry: DeadLetterEntry,
) -> Result<(), JobStoreError> {
    sqlx::query("DELETE FROM jobs WHERE id = $1")
        .bind(entry.job.id.0)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("dead_letter", e))?;

    sqlx::query(
        r#"
        INSERT INTO dead_letter_jobs (id, body, reason, dead_lettered_at)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (id) DO UPDATE
        SET body = EXCLUDED.body, reason = EXCLUDED.reason, dead_lettered_at = EXCLUDED.dead_lettered_at
        "#,
    )
    .bind(entry.job.id.0)
    .bind(encode(&entry.job)?)
    .bind(&entry.reason)
    .bind(entry.dead_lettered_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("dead_letter", e))?;

    Ok(())
}

async fn commit(tx: Transaction<'_, Postgres>) -> Result<(), JobStoreError> {
    tx.commit()
        .await
        .map_err(|e| map_sqlx_error("commit", e))
}

fn encode(job: &Job) -> Result<serde_json::Value, JobStoreError> {
    serde_json::to_value(job)
        .map_err(|e| JobStoreError::Storage(format!("failed to encode job {}: {e}", job.id)))
}

fn decode(body: serde_json::Value) -> Result<Job, JobStoreError> {
    serde_json::from_value(body)
        .map_err(|e| JobStoreError::Storage(format!("failed to decode job row: {e}")))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> JobStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            JobStoreError::Storage(format!("database error in {operation}: {}", db_err.message()))
        }
        sqlx::Error::PoolClosed => {
            JobStoreError::Storage(format!("connection pool closed in {operation}"))
        }
        other => JobStoreError::Storage(format!("sqlx error in {operation}: {other}")),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|c| c.as_ref() == "23505"),
        _ => false,
    }
}

impl JobStore for PostgresJobStore {
    fn enqueue(&self, job: Job) -> Result<JobId, JobStoreError> {
        self.block_on(self.insert_job(&job))
    }

    fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        self.block_on(self.fetch_job(job_id))
    }

    fn update(&self, job: &Job) -> Result<(), JobStoreError> {
        self.block_on(self.save_job(job))
    }

    fn claim_next(&self, lease: Duration) -> Result<Option<Job>, JobStoreError> {
        self.block_on(self.claim_job(lease))
    }

    fn complete(&self, job: &Job) -> Result<(), JobStoreError> {
        self.block_on(self.delete_completed(job))
    }

    fn dead_letter(&self, job: Job, reason: String) -> Result<(), JobStoreError> {
        self.block_on(self.move_to_dead_letter(job, reason))
    }

    fn reap_expired_leases(&self, now: DateTime<Utc>) -> Result<Vec<Job>, JobStoreError> {
        self.block_on(self.reap_leases(now))
    }

    fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, JobStoreError> {
        self.block_on(self.load_dead_letters(limit))
    }

    fn retry_dead_letter(&self, job_id: JobId) -> Result<Job, JobStoreError> {
        self.block_on(self.requeue_dead_letter(job_id))
    }

    fn stats(&self) -> Result<JobStats, JobStoreError> {
        self.block_on(self.load_stats())
    }
}
