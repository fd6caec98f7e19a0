//! SQLite checkpoint store.
//!
//! One row per network in a `checkpoints` table. Uses `sqlx` with WAL mode.
//!
//! # Usage
//! ```rust,no_run
//! use chainwatch_storage::sqlite::SqliteCheckpointStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteCheckpointStore::open("./chainwatch.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteCheckpointStore::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use chainwatch_core::{Checkpoint, CheckpointStore, ScanError};

fn storage_err(e: sqlx::Error) -> ScanError {
    ScanError::Storage(e.to_string())
}

/// SQLite-backed [`CheckpointStore`].
pub struct SqliteCheckpointStore {
    pool: SqlitePool,
}

impl SqliteCheckpointStore {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./chainwatch.db"`) or a full
    /// SQLite URL (`"sqlite:./chainwatch.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, ScanError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(storage_err)?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Open an in-memory database. All data is lost when the store is dropped.
    pub async fn in_memory() -> Result<Self, ScanError> {
        // Every connection to `:memory:` is a separate database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), ScanError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                network      TEXT    NOT NULL PRIMARY KEY,
                block_number INTEGER NOT NULL,
                tx_index     INTEGER NOT NULL,
                updated_at   INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(())
    }

    /// Unix time (seconds) of the last save for `network`.
    pub async fn updated_at(&self, network: &str) -> Result<Option<i64>, ScanError> {
        let row = sqlx::query("SELECT updated_at FROM checkpoints WHERE network = ?")
            .bind(network)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(row.map(|r| r.get::<i64, _>("updated_at")))
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn load(&self, network: &str) -> Result<Option<Checkpoint>, ScanError> {
        let row = sqlx::query("SELECT block_number, tx_index FROM checkpoints WHERE network = ?")
            .bind(network)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let malformed = |reason: String| ScanError::MalformedCheckpoint {
            network: network.to_string(),
            reason,
        };
        let block: i64 = row.get("block_number");
        let index: i64 = row.get("tx_index");
        Ok(Some(Checkpoint::new(
            u64::try_from(block).map_err(|_| malformed(format!("negative block_number {block}")))?,
            u32::try_from(index).map_err(|_| malformed(format!("tx_index {index} out of range")))?,
        )))
    }

    async fn save(&self, network: &str, checkpoint: Checkpoint) -> Result<(), ScanError> {
        let block = i64::try_from(checkpoint.block_number).map_err(|_| {
            ScanError::Storage(format!("block {} exceeds SQLite INTEGER", checkpoint.block_number))
        })?;
        sqlx::query(
            "INSERT OR REPLACE INTO checkpoints (network, block_number, tx_index, updated_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(network)
        .bind(block)
        .bind(i64::from(checkpoint.tx_index))
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        debug!(
            network,
            block = checkpoint.block_number,
            tx_index = checkpoint.tx_index,
            "checkpoint saved"
        );
        Ok(())
    }

    async fn delete(&self, network: &str) -> Result<(), ScanError> {
        sqlx::query("DELETE FROM checkpoints WHERE network = ?")
            .bind(network)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }
}
