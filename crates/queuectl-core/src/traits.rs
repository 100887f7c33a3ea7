//! Repository traits for the job store and queue configuration.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::{ConfigValue, Job, JobState, QueueConfig};

/// Durable keyed collection of jobs.
///
/// Implementations must make [`JobRepository::compare_and_swap`] atomic with
/// respect to every other write on the same job id; everything else in the
/// crate builds mutual exclusion on top of it.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert a freshly built job. Fails with [`Error::DuplicateId`] if the
    /// id is already taken.
    async fn create(&self, job: &Job) -> Result<Job>;

    /// Get a job by id.
    async fn get(&self, id: &str) -> Result<Option<Job>>;

    /// Jobs in `state`, in insertion order.
    async fn list_by_state(&self, state: JobState) -> Result<Vec<Job>>;

    /// All jobs, in insertion order.
    async fn list_all(&self) -> Result<Vec<Job>>;

    /// Claimable jobs at `now`: pending, or failed with `scheduled_at <= now`.
    /// Oldest `created_at` first, ties by insertion order.
    async fn list_eligible(&self, now: DateTime<Utc>) -> Result<Vec<Job>>;

    /// Number of jobs per state. States with no jobs may be omitted.
    async fn count_by_state(&self) -> Result<Vec<(JobState, i64)>>;

    /// Replace `current` with `next` only if the stored job still carries
    /// `current.version`. Returns the stored job on success, `None` if another
    /// writer got there first.
    async fn compare_and_swap(&self, current: &Job, next: &Job) -> Result<Option<Job>>;
}

/// Durable queue configuration.
#[async_trait]
pub trait ConfigRepository: Send + Sync {
    /// Every stored key and value.
    async fn entries(&self) -> Result<BTreeMap<String, ConfigValue>>;

    /// Store `value` under `key`, rejecting invalid values for known keys.
    async fn set(&self, key: &str, value: &ConfigValue) -> Result<()>;

    /// Effective configuration built from the stored entries.
    async fn load(&self) -> Result<QueueConfig> {
        Ok(QueueConfig::from_entries(&self.entries().await?))
    }
}

/// Read-modify-write a single job with mutual exclusion.
///
/// `mutator` computes the replacement from the current stored job. If another
/// writer changes the job in between, the job is re-read and `mutator` runs
/// again against the fresh value, so it must be free of side effects. An error
/// from `mutator` aborts without writing.
pub async fn atomic_update<R, F>(repo: &R, id: &str, mut mutator: F) -> Result<Job>
where
    R: JobRepository + ?Sized,
    F: FnMut(&Job) -> Result<Job> + Send,
{
    loop {
        let current = repo
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("job {}", id)))?;
        let next = mutator(&current)?;

        if let Some(stored) = repo.compare_and_swap(&current, &next).await? {
            return Ok(stored);
        }

        debug!(
            subsystem = "db",
            op = "atomic_update",
            job_id = %id,
            "Concurrent write detected, retrying"
        );
    }
}
