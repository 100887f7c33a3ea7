//! Centralized default constants for queuectl.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates and the CLI reference these constants instead of defining their own
//! magic numbers.

// =============================================================================
// QUEUE CONFIG
// =============================================================================

/// Default number of attempts a job gets before it is moved to the DLQ.
pub const MAX_RETRIES: u32 = 3;

/// Default exponential backoff base (delay = base^attempts seconds).
pub const BACKOFF_BASE: f64 = 2.0;

/// Latest instant a retry may be scheduled for, in Unix milliseconds
/// (9999-12-31T23:59:59.999Z). Stored timestamps keep a four-digit year.
pub const LATEST_SCHEDULE_MS: i64 = 253_402_300_799_999;

/// Config key holding the per-job retry limit snapshot source.
pub const CONFIG_KEY_MAX_RETRIES: &str = "max_retries";

/// Config key holding the backoff base.
pub const CONFIG_KEY_BACKOFF_BASE: &str = "backoff_base";

// =============================================================================
// WORKER
// =============================================================================

/// Idle sleep between polls when no job is eligible, in milliseconds.
pub const WORKER_POLL_INTERVAL_MS: u64 = 2_000;

/// Default number of worker loops per process.
pub const WORKER_COUNT: usize = 1;

/// First delay before retrying a failed outcome write, in milliseconds.
pub const RECORD_RETRY_INITIAL_MS: u64 = 100;

/// Longest delay between outcome write retries, in milliseconds.
pub const RECORD_RETRY_MAX_MS: u64 = 5_000;

/// Capacity of the worker event broadcast channel.
pub const EVENT_BUS_CAPACITY: usize = 256;

/// Longest diagnostic text kept on a job record, in bytes.
pub const DIAGNOSTIC_MAX_BYTES: usize = 4_096;

// =============================================================================
// STORAGE
// =============================================================================

/// Default database file when neither `--db` nor `QUEUECTL_DB` is given.
pub const DATABASE_PATH: &str = "queuectl.db";

/// Default maximum number of pooled SQLite connections.
pub const DB_MAX_CONNECTIONS: u32 = 8;

/// How long a connection waits on a locked database before failing, in seconds.
pub const DB_BUSY_TIMEOUT_SECS: u64 = 10;

/// Connection acquire timeout, in seconds.
pub const DB_ACQUIRE_TIMEOUT_SECS: u64 = 30;
