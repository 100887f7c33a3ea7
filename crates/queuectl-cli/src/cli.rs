//! Command-line definitions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use queuectl_core::defaults;

#[derive(Parser, Debug)]
#[command(name = "queuectl")]
#[command(author, version, about = "Durable job queue with retries and a dead-letter queue")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the queue database
    #[arg(long, global = true, env = "QUEUECTL_DB", default_value = defaults::DATABASE_PATH)]
    pub db: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Commands {
    /// Add a job given as JSON: {"id": "...", "command": "..."}
    Enqueue {
        /// Job JSON
        json: String,
    },

    /// Add a job from a JSON file
    EnqueueFile {
        /// File containing the job JSON
        path: PathBuf,
    },

    /// List jobs as JSON, optionally only those in one state
    List {
        /// One of pending, processing, completed, failed, dead
        #[arg(long)]
        state: Option<String>,
    },

    /// Show a single job
    Get {
        /// Job id
        id: String,
    },

    /// Show job counts per state
    Status,

    /// Inspect or retry dead jobs
    Dlq {
        #[command(subcommand)]
        command: DlqCommands,
    },

    /// Read or change queue configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Run workers
    Worker {
        #[command(subcommand)]
        command: WorkerCommands,
    },
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum DlqCommands {
    /// List dead jobs
    List,
    /// Move a dead job back to pending with attempts reset
    Retry {
        /// Job id
        id: String,
    },
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum ConfigCommands {
    /// Set a key; numeric-looking values are stored as numbers
    Set {
        key: String,
        #[arg(allow_hyphen_values = true)]
        value: String,
    },
    /// Show effective and stored configuration
    Show,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum WorkerCommands {
    /// Process jobs until interrupted (Ctrl-C finishes in-flight jobs first)
    Start(WorkerArgs),
}

#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerArgs {
    /// Number of worker loops [env: QUEUECTL_WORKER_COUNT]
    #[arg(long)]
    pub count: Option<usize>,

    /// Idle sleep between polls [env: QUEUECTL_POLL_INTERVAL_MS]
    #[arg(long)]
    pub poll_interval_ms: Option<u64>,

    /// Kill commands running longer than this (no limit by default)
    #[arg(long)]
    pub timeout_ms: Option<u64>,
}
