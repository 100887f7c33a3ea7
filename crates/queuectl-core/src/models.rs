//! Core data models for the job queue.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::defaults;
use crate::error::{Error, Result};

// =============================================================================
// JOB STATE
// =============================================================================

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Waiting to be claimed (initial state).
    Pending,
    /// Claimed by exactly one worker and executing.
    Processing,
    /// Executed successfully (terminal).
    Completed,
    /// Failed, waiting for its backoff to elapse before the next attempt.
    Failed,
    /// Exhausted its retries; sits in the DLQ until manually retried.
    Dead,
}

impl JobState {
    /// Every state, in lifecycle order.
    pub const ALL: [JobState; 5] = [
        JobState::Pending,
        JobState::Processing,
        JobState::Completed,
        JobState::Failed,
        JobState::Dead,
    ];

    /// Storage and wire name of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Dead => "dead",
        }
    }

    /// Whether no automatic transition leaves this state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Dead)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "pending" => Ok(JobState::Pending),
            "processing" => Ok(JobState::Processing),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            "dead" => Ok(JobState::Dead),
            other => Err(Error::InvalidState(other.to_string())),
        }
    }
}

// =============================================================================
// JOB
// =============================================================================

/// A unit of work: an id, a shell command, and its lifecycle bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub command: String,
    pub state: JobState,
    /// Completed execution attempts.
    pub attempts: u32,
    /// Retry limit copied from the queue config when the job was created.
    pub max_retries: u32,
    /// Earliest instant a failed job may be claimed again. Set only while failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Diagnostic from the most recent failed execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Store write counter for compare-and-swap updates.
    #[serde(skip)]
    pub version: i64,
}

/// Submission payload: `{"id": "...", "command": "..."}`.
///
/// Missing fields deserialize as empty strings so that validation, not the
/// JSON parser, reports them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewJob {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub command: String,
}

impl NewJob {
    pub fn new(id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            command: command.into(),
        }
    }

    /// Parse a submission from JSON text.
    pub fn from_json(json: &str) -> Result<Self> {
        let job: NewJob = serde_json::from_str(json.trim())?;
        Ok(job)
    }

    /// Reject submissions with a blank id or command.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() || self.command.trim().is_empty() {
            return Err(Error::InvalidInput(
                "job must contain 'id' and 'command'".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// QUEUE CONFIG
// =============================================================================

/// A stored config value. Numeric-looking input is kept as a number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl ConfigValue {
    /// Classify raw input: integers, then finite floats, otherwise text.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if let Ok(i) = trimmed.parse::<i64>() {
            return ConfigValue::Integer(i);
        }
        match trimmed.parse::<f64>() {
            Ok(f) if f.is_finite() => ConfigValue::Float(f),
            _ => ConfigValue::Text(raw.to_string()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ConfigValue::Integer(i) => Some(*i as f64),
            ConfigValue::Float(f) => Some(*f),
            ConfigValue::Text(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ConfigValue::Integer(i) => Some(*i),
            ConfigValue::Float(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                Some(*f as i64)
            }
            _ => None,
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Integer(i) => write!(f, "{}", i),
            ConfigValue::Float(v) => write!(f, "{}", v),
            ConfigValue::Text(s) => f.write_str(s),
        }
    }
}

/// Effective queue configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Attempts a new job gets before moving to the DLQ (snapshotted per job).
    pub max_retries: u32,
    /// Exponential backoff base, read fresh at every failure.
    pub backoff_base: f64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: defaults::MAX_RETRIES,
            backoff_base: defaults::BACKOFF_BASE,
        }
    }
}

impl QueueConfig {
    /// Build the effective config from stored entries, falling back to defaults
    /// for absent or unusable values.
    pub fn from_entries(entries: &BTreeMap<String, ConfigValue>) -> Self {
        let mut config = Self::default();

        if let Some(value) = entries.get(defaults::CONFIG_KEY_MAX_RETRIES) {
            match Self::parse_max_retries(value) {
                Ok(n) => config.max_retries = n,
                Err(e) => warn!(error = %e, "Ignoring stored max_retries, using default"),
            }
        }
        if let Some(value) = entries.get(defaults::CONFIG_KEY_BACKOFF_BASE) {
            match Self::parse_backoff_base(value) {
                Ok(b) => config.backoff_base = b,
                Err(e) => warn!(error = %e, "Ignoring stored backoff_base, using default"),
            }
        }

        config
    }

    /// Check a value before it is stored under `key`. Unknown keys accept anything.
    pub fn validate_entry(key: &str, value: &ConfigValue) -> Result<()> {
        match key {
            defaults::CONFIG_KEY_MAX_RETRIES => Self::parse_max_retries(value).map(|_| ()),
            defaults::CONFIG_KEY_BACKOFF_BASE => Self::parse_backoff_base(value).map(|_| ()),
            _ => Ok(()),
        }
    }

    fn parse_max_retries(value: &ConfigValue) -> Result<u32> {
        value
            .as_i64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| {
                Error::InvalidInput(format!(
                    "max_retries must be a non-negative integer, got '{}'",
                    value
                ))
            })
    }

    fn parse_backoff_base(value: &ConfigValue) -> Result<f64> {
        match value.as_f64() {
            Some(b) if b.is_finite() && b >= 1.0 => Ok(b),
            _ => Err(Error::InvalidInput(format!(
                "backoff_base must be a number >= 1, got '{}'",
                value
            ))),
        }
    }
}

// =============================================================================
// STATUS SUMMARY
// =============================================================================

/// Job counts per state. Every state is present, zero-filled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub counts: BTreeMap<JobState, i64>,
    pub total: i64,
}

impl StatusSummary {
    pub fn from_counts(counts: impl IntoIterator<Item = (JobState, i64)>) -> Self {
        let mut map: BTreeMap<JobState, i64> = JobState::ALL.iter().map(|s| (*s, 0)).collect();
        for (state, count) in counts {
            *map.entry(state).or_insert(0) += count;
        }
        let total = map.values().sum();
        Self { counts: map, total }
    }

    pub fn count(&self, state: JobState) -> i64 {
        self.counts.get(&state).copied().unwrap_or(0)
    }
}
