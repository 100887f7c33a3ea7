//! Dequeue and completion: claim one eligible job, run it, record the result.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use queuectl_core::lifecycle::{self, JobEvent};
use queuectl_core::{atomic_update, ConfigRepository, Error, Job, JobRepository, JobState, Result};
use queuectl_db::Database;

use crate::executor::{CommandExecutor, ExecutionOutcome, ExecutionStatus};

/// What a single dispatch step did.
#[derive(Debug, Clone, PartialEq)]
pub enum Processed {
    /// Nothing was eligible.
    Idle,
    Completed(Job),
    /// Failed with retries left; the job carries its next `scheduled_at`.
    Retrying(Job),
    /// Failed with no retries left.
    Dead(Job),
}

impl Processed {
    pub fn job(&self) -> Option<&Job> {
        match self {
            Processed::Idle => None,
            Processed::Completed(job) | Processed::Retrying(job) | Processed::Dead(job) => {
                Some(job)
            }
        }
    }
}

/// Claims jobs and applies execution results.
///
/// Holds no state of its own; any number of dispatchers may share a store.
#[derive(Clone)]
pub struct Dispatcher {
    jobs: Arc<dyn JobRepository>,
    config: Arc<dyn ConfigRepository>,
}

impl Dispatcher {
    pub fn new(jobs: Arc<dyn JobRepository>, config: Arc<dyn ConfigRepository>) -> Self {
        Self { jobs, config }
    }

    pub fn from_database(db: &Database) -> Self {
        Self::new(Arc::new(db.jobs.clone()), Arc::new(db.config.clone()))
    }

    /// Claim the oldest eligible job, or `None` if nothing is eligible.
    pub async fn claim_next(&self) -> Result<Option<Job>> {
        self.claim_next_at(Utc::now()).await
    }

    /// [`Dispatcher::claim_next`] evaluated at `now`.
    ///
    /// Each candidate is claimed with a conditional write, so concurrent
    /// callers never receive the same job. Losing a candidate moves on to the
    /// next; losing all of them triggers a rescan.
    pub async fn claim_next_at(&self, now: DateTime<Utc>) -> Result<Option<Job>> {
        let config = self.config.load().await?;

        loop {
            let candidates = self.jobs.list_eligible(now).await?;
            let mut contended = false;

            for candidate in &candidates {
                let claimed = match lifecycle::apply(candidate, &JobEvent::Claim, &config, now) {
                    Ok(job) => job,
                    Err(_) => continue,
                };

                match self.jobs.compare_and_swap(candidate, &claimed).await? {
                    Some(job) => {
                        debug!(
                            subsystem = "jobs",
                            component = "dispatcher",
                            op = "claim",
                            job_id = %job.id,
                            attempts = job.attempts,
                            "Job claimed"
                        );
                        return Ok(Some(job));
                    }
                    None => contended = true,
                }
            }

            if !contended {
                return Ok(None);
            }
        }
    }

    /// Run a claimed job and record the outcome.
    pub async fn execute(&self, job: Job, executor: &dyn CommandExecutor) -> Result<Processed> {
        let outcome = self.run(&job, executor).await;
        self.complete_at(&job, &outcome, Utc::now()).await
    }

    /// Run a claimed job's command without recording anything.
    pub async fn run(&self, job: &Job, executor: &dyn CommandExecutor) -> ExecutionOutcome {
        info!(
            subsystem = "jobs",
            component = "dispatcher",
            op = "execute",
            job_id = %job.id,
            command = %job.command,
            attempts = job.attempts,
            "Processing job"
        );

        executor.run(&job.command).await
    }

    /// Apply `outcome` to the claimed `job` at `now`.
    ///
    /// Backoff uses the config as it is now, not as it was when the job was
    /// created.
    pub async fn complete_at(
        &self,
        job: &Job,
        outcome: &ExecutionOutcome,
        now: DateTime<Utc>,
    ) -> Result<Processed> {
        let config = self.config.load().await?;
        let event = match outcome.status {
            ExecutionStatus::Succeeded => JobEvent::Succeed,
            ExecutionStatus::Failed => JobEvent::Fail {
                diagnostic: outcome.diagnostic.clone(),
            },
        };

        let updated = atomic_update(self.jobs.as_ref(), &job.id, |current| {
            lifecycle::apply(current, &event, &config, now)
        })
        .await?;

        let duration_ms = outcome.duration.as_millis() as u64;
        match updated.state {
            JobState::Completed => {
                info!(
                    subsystem = "jobs",
                    component = "dispatcher",
                    op = "complete",
                    job_id = %updated.id,
                    duration_ms,
                    "Job completed"
                );
                Ok(Processed::Completed(updated))
            }
            JobState::Failed => {
                let backoff_ms = updated
                    .scheduled_at
                    .map(|at| (at - now).num_milliseconds())
                    .unwrap_or(0);
                warn!(
                    subsystem = "jobs",
                    component = "dispatcher",
                    op = "fail",
                    job_id = %updated.id,
                    job_state = %updated.state,
                    attempts = updated.attempts,
                    backoff_ms,
                    duration_ms,
                    error = %outcome.diagnostic,
                    "Job failed, retry scheduled"
                );
                Ok(Processed::Retrying(updated))
            }
            JobState::Dead => {
                warn!(
                    subsystem = "jobs",
                    component = "dispatcher",
                    op = "fail",
                    job_id = %updated.id,
                    job_state = %updated.state,
                    attempts = updated.attempts,
                    duration_ms,
                    error = %outcome.diagnostic,
                    "Job failed, moved to DLQ"
                );
                Ok(Processed::Dead(updated))
            }
            other => Err(Error::Internal(format!(
                "job {} in unexpected state {} after execution",
                updated.id, other
            ))),
        }
    }

    /// Claim, execute, and record one job.
    pub async fn process_next(&self, executor: &dyn CommandExecutor) -> Result<Processed> {
        match self.claim_next().await? {
            Some(job) => self.execute(job, executor).await,
            None => Ok(Processed::Idle),
        }
    }
}

