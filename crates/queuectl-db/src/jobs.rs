//! Job repository implementation.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tokio::sync::Notify;
use tracing::debug;

use queuectl_core::{Error, Job, JobRepository, JobState, Result};

const JOB_COLUMNS: &str = "id, command, state, attempts, max_retries, scheduled_at, last_error, \
                           created_at, updated_at, version";

/// SQLite implementation of JobRepository.
///
/// Every state change goes through [`JobRepository::compare_and_swap`], a
/// single `UPDATE ... WHERE version = ?` statement. SQLite serializes writers
/// across connections and processes, so two claimers can never both win.
#[derive(Clone)]
pub struct SqliteJobRepository {
    pool: SqlitePool,
    /// Notify handle for waking idle workers when a job becomes claimable.
    notify: Arc<Notify>,
}

impl SqliteJobRepository {
    /// Create a new SqliteJobRepository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            notify: Arc::new(Notify::new()),
        }
    }

    /// Create a new SqliteJobRepository sharing an existing notify handle.
    pub fn with_notify(pool: SqlitePool, notify: Arc<Notify>) -> Self {
        Self { pool, notify }
    }

    /// Get the job notification handle for event-driven waking.
    ///
    /// Only wakes workers in this process; other processes find new work on
    /// their next poll.
    pub fn job_notify(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    fn parse_job_row(row: &SqliteRow) -> Result<Job> {
        let state: String = row.try_get("state")?;
        let attempts: i64 = row.try_get("attempts")?;
        let max_retries: i64 = row.try_get("max_retries")?;
        let scheduled_at: Option<String> = row.try_get("scheduled_at")?;
        let created_at: String = row.try_get("created_at")?;
        let updated_at: String = row.try_get("updated_at")?;

        Ok(Job {
            id: row.try_get("id")?,
            command: row.try_get("command")?,
            state: JobState::from_str(&state)?,
            attempts: to_u32("attempts", attempts)?,
            max_retries: to_u32("max_retries", max_retries)?,
            scheduled_at: scheduled_at.as_deref().map(decode_ts).transpose()?,
            last_error: row.try_get("last_error")?,
            created_at: decode_ts(&created_at)?,
            updated_at: decode_ts(&updated_at)?,
            version: row.try_get("version")?,
        })
    }

    fn parse_rows(rows: Vec<SqliteRow>) -> Result<Vec<Job>> {
        rows.iter().map(Self::parse_job_row).collect()
    }
}

/// Timestamps are stored as fixed-width RFC 3339 text in UTC with nanosecond
/// precision, so lexical order in SQL matches time order.
pub(crate) fn encode_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn decode_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| Error::Serialization(format!("bad timestamp '{}': {}", raw, e)))
}

fn to_u32(column: &str, value: i64) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| Error::Internal(format!("column {} out of range: {}", column, value)))
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
    async fn create(&self, job: &Job) -> Result<Job> {
        let result = sqlx::query(
            "INSERT INTO jobs (id, command, state, attempts, max_retries, scheduled_at, \
             last_error, created_at, updated_at, version) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0)",
        )
        .bind(&job.id)
        .bind(&job.command)
        .bind(job.state.as_str())
        .bind(i64::from(job.attempts))
        .bind(i64::from(job.max_retries))
        .bind(job.scheduled_at.map(encode_ts))
        .bind(&job.last_error)
        .bind(encode_ts(job.created_at))
        .bind(encode_ts(job.updated_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {}
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                return Err(Error::DuplicateId(job.id.clone()));
            }
            Err(e) => return Err(Error::Database(e)),
        }

        debug!(
            subsystem = "jobs",
            component = "repository",
            op = "create",
            job_id = %job.id,
            max_retries = job.max_retries,
            "Job stored"
        );

        if job.state == JobState::Pending {
            self.notify.notify_waiters();
        }

        let mut stored = job.clone();
        stored.version = 0;
        Ok(stored)
    }

    async fn get(&self, id: &str) -> Result<Option<Job>> {
        let row = sqlx::query(&format!("SELECT {} FROM jobs WHERE id = ?", JOB_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::parse_job_row).transpose()
    }

    async fn list_by_state(&self, state: JobState) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM jobs WHERE state = ? ORDER BY seq",
            JOB_COLUMNS
        ))
        .bind(state.as_str())
        .fetch_all(&self.pool)
        .await?;

        Self::parse_rows(rows)
    }

    async fn list_all(&self) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!("SELECT {} FROM jobs ORDER BY seq", JOB_COLUMNS))
            .fetch_all(&self.pool)
            .await?;

        Self::parse_rows(rows)
    }

    async fn list_eligible(&self, now: DateTime<Utc>) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM jobs \
             WHERE state = 'pending' \
                OR (state = 'failed' AND (scheduled_at IS NULL OR scheduled_at <= ?)) \
             ORDER BY created_at, seq",
            JOB_COLUMNS
        ))
        .bind(encode_ts(now))
        .fetch_all(&self.pool)
        .await?;

        Self::parse_rows(rows)
    }

    async fn count_by_state(&self) -> Result<Vec<(JobState, i64)>> {
        let rows = sqlx::query("SELECT state, COUNT(*) AS n FROM jobs GROUP BY state")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> Result<(JobState, i64)> {
                let state: String = row.try_get("state")?;
                let count: i64 = row.try_get("n")?;
                Ok((JobState::from_str(&state)?, count))
            })
            .collect()
    }

    async fn compare_and_swap(&self, current: &Job, next: &Job) -> Result<Option<Job>> {
        if current.id != next.id {
            return Err(Error::Internal(format!(
                "compare_and_swap cannot change job id ({} -> {})",
                current.id, next.id
            )));
        }

        let result = sqlx::query(
            "UPDATE jobs SET command = ?, state = ?, attempts = ?, max_retries = ?, \
             scheduled_at = ?, last_error = ?, updated_at = ?, version = version + 1 \
             WHERE id = ? AND version = ?",
        )
        .bind(&next.command)
        .bind(next.state.as_str())
        .bind(i64::from(next.attempts))
        .bind(i64::from(next.max_retries))
        .bind(next.scheduled_at.map(encode_ts))
        .bind(&next.last_error)
        .bind(encode_ts(next.updated_at))
        .bind(&current.id)
        .bind(current.version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            debug!(
                subsystem = "jobs",
                component = "repository",
                op = "compare_and_swap",
                job_id = %current.id,
                version = current.version,
                "Version conflict"
            );
            return Ok(None);
        }

        if next.state == JobState::Pending {
            self.notify.notify_waiters();
        }

        let mut stored = next.clone();
        stored.created_at = current.created_at;
        stored.version = current.version + 1;
        Ok(Some(stored))
    }
}
