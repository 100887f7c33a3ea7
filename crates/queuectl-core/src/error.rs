//! Error types for queuectl.

use thiserror::Error;

use crate::models::JobState;

/// Result type alias using queuectl's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for queuectl operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Storage operation failed (wraps sqlx::Error). Nothing from the
    /// failed operation may be considered applied.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// A job with this id already exists
    #[error("Duplicate job id: {0}")]
    DuplicateId(String),

    /// Unrecognized job state name
    #[error("Invalid state: {0} (expected one of pending, processing, completed, failed, dead)")]
    InvalidState(String),

    /// Event not legal for the job's current state
    #[error("Invalid transition: cannot apply '{event}' to job '{job_id}' in state {from}")]
    InvalidTransition {
        job_id: String,
        from: JobState,
        event: &'static str,
    },

    /// Invalid input (missing fields, malformed values)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl Error {
    /// Whether this error means the requested job does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Whether this error comes from the storage layer.
    pub fn is_storage(&self) -> bool {
        matches!(self, Error::Database(_))
    }
}
