//! # queuectl-core
//!
//! Core types, traits, and the job lifecycle engine for queuectl.
//!
//! This crate provides the data model (`Job`, `JobState`, `QueueConfig`),
//! the pure state machine in [`lifecycle`], and the repository traits the
//! storage layer implements. It holds no state of its own.

pub mod defaults;
pub mod error;
pub mod lifecycle;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use lifecycle::JobEvent;
pub use models::*;
pub use traits::*;
