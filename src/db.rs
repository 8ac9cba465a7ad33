//! SQLite pool construction.
//!
//! WAL mode keeps readers unblocked while a writer holds the database;
//! the busy timeout bounds how long a writer waits for the lock before
//! the store's retry logic sees `SQLITE_BUSY`. Foreign keys are enforced
//! so a state row can never outlive its entity.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::time::Duration;

use crate::config::StorageConfig;

fn connect_options(storage: &StorageConfig) -> SqliteConnectOptions {
    SqliteConnectOptions::new()
        .filename(&storage.path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_millis(storage.busy_timeout_ms))
}

/// Open (creating if needed) the database described by `[storage]`.
pub async fn connect(storage: &StorageConfig) -> Result<SqlitePool> {
    if let Some(dir) = storage.path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("cannot create data directory {}", dir.display()))?;
    }

    SqlitePoolOptions::new()
        .max_connections(storage.max_connections)
        .connect_with(connect_options(storage))
        .await
        .with_context(|| format!("cannot open database at {}", storage.path.display()))
}
