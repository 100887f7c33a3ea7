//! Test fixtures for database integration tests.
//!
//! Each [`TestDatabase`] is a migrated store in its own temporary directory,
//! removed when the fixture is dropped.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use queuectl_db::test_fixtures::TestDatabase;
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let test_db = TestDatabase::new().await;
//!     let jobs = test_db.db.jobs.list_all().await.unwrap();
//!     assert!(jobs.is_empty());
//! }
//! ```

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::{Database, PoolConfig};

/// Migrated throwaway database.
pub struct TestDatabase {
    pub db: Database,
    path: PathBuf,
    _dir: TempDir,
}

impl TestDatabase {
    /// Create a new test database with the default pool size.
    pub async fn new() -> Self {
        Self::with_config(PoolConfig::default()).await
    }

    /// Create a new test database with custom pool configuration.
    pub async fn with_config(config: PoolConfig) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir for test database");
        let path = dir.path().join("queue.db");
        let location = path.to_str().expect("temp path is not UTF-8").to_string();

        let db = Database::connect_with_config(&location, config)
            .await
            .expect("Failed to open test database");

        Self {
            db,
            path,
            _dir: dir,
        }
    }

    /// Path of the database file, for opening a second independent handle.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open another `Database` on the same file, as a separate process would.
    pub async fn reopen(&self) -> Database {
        let location = self.path.to_str().expect("temp path is not UTF-8");
        Database::connect(location)
            .await
            .expect("Failed to reopen test database")
    }
}
