//! # queuectl-db
//!
//! SQLite storage layer for queuectl.
//!
//! This crate provides:
//! - Connection pool management (WAL mode, full sync, busy timeout)
//! - Embedded schema migrations
//! - The job and config repository implementations
//!
//! ## Example
//!
//! ```rust,ignore
//! use queuectl_db::{Database, JobRepository};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("queuectl.db").await?;
//!     let pending = db.jobs.list_by_state(queuectl_db::JobState::Pending).await?;
//!     println!("{} pending", pending.len());
//!     Ok(())
//! }
//! ```
pub mod config;
pub mod jobs;
pub mod pool;

// Test fixtures for integration tests
// Note: Always compiled so integration tests in other crates can use TestDatabase
pub mod test_fixtures;

// Re-export core types
pub use queuectl_core::*;

pub use config::SqliteConfigRepository;
pub use jobs::SqliteJobRepository;
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};

use sqlx::SqlitePool;
use tracing::info;

/// Combined database context with all repositories.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: SqlitePool,
    /// Job store.
    pub jobs: SqliteJobRepository,
    /// Queue configuration store.
    pub config: SqliteConfigRepository,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    ///
    /// Does not run migrations; see [`Database::migrate`].
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            jobs: SqliteJobRepository::new(pool.clone()),
            config: SqliteConfigRepository::new(pool.clone()),
            pool,
        }
    }

    /// Open the store at `location` and bring its schema up to date.
    pub async fn connect(location: &str) -> Result<Self> {
        Self::connect_with_config(location, PoolConfig::default()).await
    }

    /// Open the store with custom pool configuration and migrate it.
    pub async fn connect_with_config(location: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(location, config).await?;
        let db = Self::new(pool);
        db.migrate().await?;
        Ok(db)
    }

    /// Run embedded migrations. Safe to call on an up-to-date store.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;

        info!(
            subsystem = "database",
            component = "migrations",
            op = "run",
            "Schema up to date"
        );
        Ok(())
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
