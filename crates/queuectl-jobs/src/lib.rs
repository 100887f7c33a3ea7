//! # queuectl-jobs
//!
//! Job processing for queuectl.
//!
//! This crate provides:
//! - The executor adapter that runs job commands
//! - The dispatcher that claims exactly one eligible job at a time
//! - Worker loops with cooperative shutdown and broadcast events
//! - Administrative queue operations
//!
//! ## Example
//!
//! ```ignore
//! use queuectl_db::Database;
//! use queuectl_jobs::{WorkerBuilder, WorkerConfig};
//!
//! let db = Database::connect("queuectl.db").await?;
//!
//! let handle = WorkerBuilder::new(db)
//!     .with_config(WorkerConfig::default().with_worker_count(2))
//!     .build()
//!     .start();
//!
//! let mut events = handle.events();
//! tokio::spawn(async move {
//!     while let Ok(event) = events.recv().await {
//!         println!("Event: {:?}", event);
//!     }
//! });
//!
//! tokio::signal::ctrl_c().await?;
//! handle.shutdown().await?;
//! ```

pub mod admin;
pub mod dispatcher;
pub mod executor;
pub mod worker;

// Re-export core types
pub use queuectl_core::*;

pub use admin::{ConfigReport, DlqRetry, QueueAdmin};
pub use dispatcher::{Dispatcher, Processed};
pub use executor::{CommandExecutor, ExecutionOutcome, ExecutionStatus, NoOpExecutor, ShellExecutor};
pub use worker::{JobWorker, WorkerBuilder, WorkerConfig, WorkerEvent, WorkerHandle};
