//! Job lifecycle state machine.
//!
//! Pure functions only: nothing here touches storage or runs commands. The
//! store applies these transitions under its own mutual exclusion.
//!
//! | From | Event | Guard | To |
//! |------|-------|-------|----|
//! | pending | claim | | processing |
//! | failed | claim | `now >= scheduled_at` | processing |
//! | processing | succeed | | completed |
//! | processing | fail | `attempts + 1 < max_retries` | failed |
//! | processing | fail | `attempts + 1 >= max_retries` | dead |
//! | dead | manual retry | | pending |

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::defaults;
use crate::error::{Error, Result};
use crate::models::{Job, JobState, NewJob, QueueConfig};

/// Something that happened to a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    /// A worker takes exclusive ownership of the job.
    Claim,
    /// The command ran successfully.
    Succeed,
    /// The command failed; `diagnostic` is kept on the job.
    Fail { diagnostic: String },
    /// Operator override returning a dead job to the queue.
    ManualRetry,
}

impl JobEvent {
    pub fn name(&self) -> &'static str {
        match self {
            JobEvent::Claim => "claim",
            JobEvent::Succeed => "succeed",
            JobEvent::Fail { .. } => "fail",
            JobEvent::ManualRetry => "manual_retry",
        }
    }
}

/// Build a new pending job, snapshotting `max_retries` from `config`.
pub fn create(new_job: &NewJob, config: &QueueConfig, now: DateTime<Utc>) -> Result<Job> {
    new_job.validate()?;
    Ok(Job {
        id: new_job.id.trim().to_string(),
        command: new_job.command.clone(),
        state: JobState::Pending,
        attempts: 0,
        max_retries: config.max_retries,
        scheduled_at: None,
        last_error: None,
        created_at: now,
        updated_at: now,
        version: 0,
    })
}

/// Whether `job` may be claimed at `now`.
///
/// A failed job without a schedule is treated as immediately eligible.
pub fn is_eligible(job: &Job, now: DateTime<Utc>) -> bool {
    match job.state {
        JobState::Pending => true,
        JobState::Failed => job.scheduled_at.map_or(true, |at| at <= now),
        _ => false,
    }
}

/// Delay before the next attempt after `attempts` failures: `base^attempts`
/// seconds. `None` when the delay does not fit in a [`Duration`].
pub fn backoff_delay(backoff_base: f64, attempts: u32) -> Option<Duration> {
    let exponent = i32::try_from(attempts).unwrap_or(i32::MAX);
    let millis = (backoff_base.powi(exponent) * 1000.0).round();
    if !millis.is_finite() || millis < 0.0 || millis >= i64::MAX as f64 {
        return None;
    }
    Some(Duration::milliseconds(millis as i64))
}

/// When a job failing at `now` after `attempts` failures becomes eligible.
///
/// Saturates at [`defaults::LATEST_SCHEDULE_MS`] when the delay overflows or
/// would land past the latest storable instant.
pub fn retry_at(backoff_base: f64, attempts: u32, now: DateTime<Utc>) -> DateTime<Utc> {
    let headroom = Duration::milliseconds(
        defaults::LATEST_SCHEDULE_MS
            .saturating_sub(now.timestamp_millis())
            .max(0),
    );
    let delay = backoff_delay(backoff_base, attempts).map_or(headroom, |d| d.min(headroom));
    now + delay
}

/// Compute the job that results from applying `event` to `job` at `now`.
///
/// Returns [`Error::InvalidTransition`] when the event is not legal for the
/// job's current state; the input job is never modified.
pub fn apply(job: &Job, event: &JobEvent, config: &QueueConfig, now: DateTime<Utc>) -> Result<Job> {
    let mut next = job.clone();
    next.updated_at = now;

    match (job.state, event) {
        (JobState::Pending, JobEvent::Claim) => {
            next.state = JobState::Processing;
        }
        (JobState::Failed, JobEvent::Claim) if is_eligible(job, now) => {
            next.state = JobState::Processing;
            next.scheduled_at = None;
        }
        (JobState::Processing, JobEvent::Succeed) => {
            next.state = JobState::Completed;
        }
        (JobState::Processing, JobEvent::Fail { diagnostic }) => {
            let attempts = job.attempts.saturating_add(1);
            next.attempts = attempts;
            next.last_error = Some(truncate_diagnostic(diagnostic));

            if attempts < job.max_retries {
                let at = retry_at(config.backoff_base, attempts, now);
                let delay = at - now;
                next.state = JobState::Failed;
                next.scheduled_at = Some(at);
                debug!(
                    subsystem = "lifecycle",
                    job_id = %job.id,
                    attempts,
                    backoff_ms = delay.num_milliseconds(),
                    "Scheduling retry"
                );
            } else {
                next.state = JobState::Dead;
                next.scheduled_at = None;
                debug!(
                    subsystem = "lifecycle",
                    job_id = %job.id,
                    attempts,
                    max_retries = job.max_retries,
                    "Retries exhausted"
                );
            }
        }
        (JobState::Dead, JobEvent::ManualRetry) => {
            next.state = JobState::Pending;
            next.attempts = 0;
            next.scheduled_at = None;
        }
        (from, event) => {
            return Err(Error::InvalidTransition {
                job_id: job.id.clone(),
                from,
                event: event.name(),
            });
        }
    }

    Ok(next)
}

fn truncate_diagnostic(diagnostic: &str) -> String {
    let trimmed = diagnostic.trim();
    if trimmed.len() <= defaults::DIAGNOSTIC_MAX_BYTES {
        return trimmed.to_string();
    }
    let mut end = defaults::DIAGNOSTIC_MAX_BYTES;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    trimmed[..end].to_string()
}
