use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};

use gator_core::error::AppError;
use gator_core::job::{Job, JobStatus, JobType, NewJob, Priority};
use gator_core::job_queue::JobQueue;
use gator_core::memory_queue::STALE_RECOVERY_NOTE;

/// PostgreSQL-backed job queue using `SELECT FOR UPDATE SKIP LOCKED`.
#[derive(Clone)]
pub struct PgJobQueue {
    pool: Pool<Postgres>,
}

impl PgJobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct JobRow {
    id: String,
    #[sqlx(rename = "type")]
    job_type: String,
    priority: i16,
    status: String,
    payload: serde_json::Value,
    result: Option<serde_json::Value>,
    error: Option<String>,
    attempts: i32,
    max_attempts: i32,
    scheduled_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for Job {
    type Error = AppError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let job_type: JobType = row.job_type.parse().map_err(AppError::ParseError)?;
        let status: JobStatus = row.status.parse().map_err(AppError::ParseError)?;

        Ok(Job {
            id: row.id,
            job_type,
            priority: Priority::from_i16(row.priority),
            status,
            payload: row.payload,
            result: row.result.unwrap_or(serde_json::Value::Null),
            error: row.error,
            attempts: row.attempts.max(0) as u32,
            max_attempts: row.max_attempts.max(0) as u32,
            scheduled_at: row.scheduled_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn db_err(e: sqlx::Error) -> AppError {
    AppError::DatabaseError(e.to_string())
}

/// Counters are `INTEGER` columns; values past `i32::MAX` are rejected rather than wrapped.
fn stored_count(value: u32, column: &str) -> Result<i32, AppError> {
    i32::try_from(value).map_err(|_| {
        AppError::ValidationError(format!("{column} {value} exceeds the column range"))
    })
}

fn stored_result(job: &Job) -> Option<&serde_json::Value> {
    (!job.result.is_null()).then_some(&job.result)
}

const UPDATE_JOB: &str = r#"
    UPDATE jobs
    SET type = $2, priority = $3, status = $4, payload = $5, result = $6, error = $7,
        attempts = $8, max_attempts = $9, scheduled_at = $10, started_at = $11,
        completed_at = $12, updated_at = $13
    WHERE id = $1
"#;

impl JobQueue for PgJobQueue {
    async fn enqueue(&self, job: NewJob) -> Result<Job, AppError> {
        let job = job.into_job(Utc::now())?;
        let attempts = stored_count(job.attempts, "attempts")?;
        let max_attempts = stored_count(job.max_attempts, "max_attempts")?;
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            INSERT INTO jobs (id, type, priority, status, payload, attempts, max_attempts,
                              scheduled_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9)
            ON CONFLICT (id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(&job.id)
        .bind(job.job_type.as_str())
        .bind(job.priority.as_i16())
        .bind(job.status.as_str())
        .bind(&job.payload)
        .bind(attempts)
        .bind(max_attempts)
        .bind(job.scheduled_at)
        .bind(job.created_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        match row {
            Some(row) => row.try_into(),
            None => Err(AppError::InvalidState(format!(
                "job {} already exists",
                job.id
            ))),
        }
    }

    async fn claim_next(&self) -> Result<Option<Job>, AppError> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET status = 'running', attempts = attempts + 1,
                started_at = NOW(), updated_at = NOW()
            WHERE id = (
                SELECT id FROM jobs
                WHERE status = 'pending'
                  AND scheduled_at <= NOW()
                  AND attempts < max_attempts
                ORDER BY priority DESC, scheduled_at ASC, created_at ASC, id ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(Job::try_from).transpose()
    }

    async fn update_job(&self, job: &Job) -> Result<(), AppError> {
        let attempts = stored_count(job.attempts, "attempts")?;
        let max_attempts = stored_count(job.max_attempts, "max_attempts")?;
        let result = sqlx::query(UPDATE_JOB)
            .bind(&job.id)
            .bind(job.job_type.as_str())
            .bind(job.priority.as_i16())
            .bind(job.status.as_str())
            .bind(&job.payload)
            .bind(stored_result(job))
            .bind(job.error.as_deref())
            .bind(attempts)
            .bind(max_attempts)
            .bind(job.scheduled_at)
            .bind(job.started_at)
            .bind(job.completed_at)
            .bind(job.updated_at)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("job {}", job.id)));
        }
        Ok(())
    }

    async fn get_job(&self, id: &str) -> Result<Option<Job>, AppError> {
        let row = sqlx::query_as::<_, JobRow>(r#"SELECT * FROM jobs WHERE id = $1"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.map(Job::try_from).transpose()
    }

    async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<Job>, AppError> {
        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT * FROM jobs
            WHERE $1::varchar IS NULL OR status = $1
            ORDER BY created_at DESC, id ASC
            LIMIT $2
            "#,
        )
        .bind(status.map(|s| s.as_str()))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(Job::try_from).collect()
    }

    async fn delete_job(&self, id: &str) -> Result<(), AppError> {
        let result = sqlx::query(r#"DELETE FROM jobs WHERE id = $1"#)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("job {id}")));
        }
        Ok(())
    }

    async fn cancel_job(&self, id: &str) -> Result<Job, AppError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let row = sqlx::query_as::<_, JobRow>(r#"SELECT * FROM jobs WHERE id = $1 FOR UPDATE"#)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?
            .ok_or_else(|| AppError::NotFound(format!("job {id}")))?;

        let mut job = Job::try_from(row)?;
        job.mark_cancelled(Utc::now())?;

        sqlx::query(
            r#"
            UPDATE jobs
            SET status = $2, completed_at = $3, updated_at = $3
            WHERE id = $1
            "#,
        )
        .bind(&job.id)
        .bind(job.status.as_str())
        .bind(job.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(job)
    }

    async fn count_by_status(&self, status: JobStatus) -> Result<i64, AppError> {
        let (count,): (i64,) = sqlx::query_as(r#"SELECT COUNT(*) FROM jobs WHERE status = $1"#)
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(count)
    }

    async fn purge_terminal(&self, before: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE status IN ('completed', 'failed', 'cancelled')
              AND updated_at < $1
            "#,
        )
        .bind(before)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected())
    }

    async fn recover_stale(&self, started_before: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET
                status = CASE WHEN attempts < max_attempts THEN 'pending' ELSE 'failed' END,
                scheduled_at = CASE WHEN attempts < max_attempts THEN NOW() ELSE scheduled_at END,
                completed_at = CASE WHEN attempts < max_attempts THEN NULL ELSE NOW() END,
                started_at = NULL,
                error = $2,
                updated_at = NOW()
            WHERE status = 'running' AND started_at < $1
            "#,
        )
        .bind(started_before)
        .bind(STALE_RECOVERY_NOTE)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() > 0 {
            tracing::info!(recovered = result.rows_affected(), "Recovered stale running jobs");
        }
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stored_count_rejects_values_past_column_range() {
        assert_eq!(stored_count(3, "attempts").unwrap(), 3);
        assert_eq!(stored_count(i32::MAX as u32, "attempts").unwrap(), i32::MAX);
        let err = stored_count(u32::MAX, "max_attempts").unwrap_err();
        assert!(matches!(err, AppError::ValidationError(msg) if msg.starts_with("max_attempts")));
    }
}
