//! Administrative operations: submission, inspection, DLQ, and config.
//!
//! These go straight to the store. State changes still run through the
//! lifecycle rules and [`atomic_update`], so they cannot race a worker.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::info;

use queuectl_core::lifecycle::{self, JobEvent};
use queuectl_core::{
    atomic_update, ConfigRepository, ConfigValue, Error, Job, JobRepository, JobState, NewJob,
    QueueConfig, Result, StatusSummary,
};
use queuectl_db::Database;

/// Result of a DLQ retry request.
#[derive(Debug, Clone, PartialEq)]
pub enum DlqRetry {
    /// The job is pending again with its attempts reset.
    Retried(Job),
    /// No job with that id is in the DLQ.
    NotFoundOrNotDead,
}

/// Effective configuration plus everything stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigReport {
    pub effective: QueueConfig,
    pub entries: BTreeMap<String, ConfigValue>,
}

#[derive(Clone)]
pub struct QueueAdmin {
    jobs: Arc<dyn JobRepository>,
    config: Arc<dyn ConfigRepository>,
}

impl QueueAdmin {
    pub fn new(jobs: Arc<dyn JobRepository>, config: Arc<dyn ConfigRepository>) -> Self {
        Self { jobs, config }
    }

    pub fn from_database(db: &Database) -> Self {
        Self::new(Arc::new(db.jobs.clone()), Arc::new(db.config.clone()))
    }

    /// Submit a new job. Its retry limit is taken from the current config.
    pub async fn submit(&self, new_job: &NewJob) -> Result<Job> {
        let config = self.config.load().await?;
        let job = lifecycle::create(new_job, &config, Utc::now())?;
        let stored = self.jobs.create(&job).await?;

        info!(
            subsystem = "admin",
            op = "submit",
            job_id = %stored.id,
            max_retries = stored.max_retries,
            "Job enqueued"
        );
        Ok(stored)
    }

    /// Submit a job given as `{"id": ..., "command": ...}`.
    pub async fn submit_json(&self, json: &str) -> Result<Job> {
        let new_job = NewJob::from_json(json)?;
        self.submit(&new_job).await
    }

    /// Look up a job. Ids are trimmed the same way `submit` trims them.
    pub async fn get(&self, id: &str) -> Result<Job> {
        let id = id.trim();
        self.jobs
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("job {}", id)))
    }

    /// Jobs in the named state. Unknown names fail with `InvalidState`.
    pub async fn list_by_state(&self, state: &str) -> Result<Vec<Job>> {
        let state: JobState = state.parse()?;
        self.jobs.list_by_state(state).await
    }

    pub async fn list_all(&self) -> Result<Vec<Job>> {
        self.jobs.list_all().await
    }

    /// Counts for every state, zero-filled.
    pub async fn status(&self) -> Result<StatusSummary> {
        Ok(StatusSummary::from_counts(self.jobs.count_by_state().await?))
    }

    pub async fn dlq_list(&self) -> Result<Vec<Job>> {
        self.jobs.list_by_state(JobState::Dead).await
    }

    /// Move a dead job back to pending with attempts reset.
    pub async fn dlq_retry(&self, id: &str) -> Result<DlqRetry> {
        let id = id.trim();
        match self.jobs.get(id).await? {
            Some(job) if job.state == JobState::Dead => {}
            _ => return Ok(DlqRetry::NotFoundOrNotDead),
        }

        let config = self.config.load().await?;
        let now = Utc::now();
        let result = atomic_update(self.jobs.as_ref(), id, |current| {
            lifecycle::apply(current, &JobEvent::ManualRetry, &config, now)
        })
        .await;

        match result {
            Ok(job) => {
                info!(
                    subsystem = "admin",
                    op = "dlq_retry",
                    job_id = %job.id,
                    "Job moved from DLQ to pending"
                );
                Ok(DlqRetry::Retried(job))
            }
            // Retried or removed by someone else in the meantime.
            Err(Error::InvalidTransition { .. }) | Err(Error::NotFound(_)) => {
                Ok(DlqRetry::NotFoundOrNotDead)
            }
            Err(e) => Err(e),
        }
    }

    /// Store `raw` under `key`, as a number if it looks like one.
    pub async fn config_set(&self, key: &str, raw: &str) -> Result<ConfigValue> {
        let key = key.trim();
        if key.is_empty() {
            return Err(Error::InvalidInput("config key must not be empty".to_string()));
        }
        let value = ConfigValue::parse(raw);
        self.config.set(key, &value).await?;
        Ok(value)
    }

    pub async fn config_show(&self) -> Result<ConfigReport> {
        let entries = self.config.entries().await?;
        Ok(ConfigReport {
            effective: QueueConfig::from_entries(&entries),
            entries,
        })
    }
}
