//! Durable per-workspace UI state.
//!
//! One row per workspace holding the last state blob written for it. Blobs
//! are opaque strings; writes are last-write-wins with no history.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("state database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Clone)]
pub struct StateStore {
    pool: SqlitePool,
}

impl StateStore {
    /// Open (creating if needed) the state database at `path`.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let newly_created = !path.exists();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(1));
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        if newly_created {
            tracing::info!(path = %path.display(), "created state database");
        } else {
            tracing::info!(path = %path.display(), "opened state database");
        }

        Self::with_pool(pool).await
    }

    /// Open a private in-memory store.
    pub async fn in_memory() -> Result<Self, StoreError> {
        // A single connection so every query sees the same in-memory database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS states (
                place TEXT PRIMARY KEY NOT NULL,
                state TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }

    /// Store `state` for `place`, replacing any previous value.
    pub async fn put(&self, place: &str, state: &str) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO states (place, state) VALUES (?, ?)
             ON CONFLICT(place) DO UPDATE SET state = excluded.state",
        )
        .bind(place)
        .bind(state)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch the last state written for `place`, or `None` if never written.
    pub async fn get(&self, place: &str) -> Result<Option<String>, StoreError> {
        let state: Option<String> = sqlx::query_scalar("SELECT state FROM states WHERE place = ?")
            .bind(place)
            .fetch_optional(&self.pool)
            .await?;
        Ok(state)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
