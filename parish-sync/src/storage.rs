//! Durable key-value storage backing the cache and the mutation queue
//!
//! Provides:
//! - [`KeyValueStore`], the persistence seam the engine depends on
//! - [`SqliteKeyValueStore`], a local SQLite file (the on-device store)
//! - [`MemoryKeyValueStore`], process-local storage for tests and dry runs

use crate::error::SyncResult;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;

/// Durable read/write of whole string values by key.
///
/// `put` must replace the value atomically: a reader sees either the old or
/// the new document, never a mix.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> SyncResult<Option<String>>;

    async fn put(&self, key: &str, value: &str) -> SyncResult<()>;
}

/// Configuration for the local SQLite store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalStoreConfig {
    /// Path to the database file
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Whether to enable WAL mode
    #[serde(default = "default_true")]
    pub enable_wal: bool,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("parish_local.db")
}

fn default_max_connections() -> u32 {
    4
}

fn default_true() -> bool {
    true
}

impl Default for LocalStoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            max_connections: default_max_connections(),
            enable_wal: true,
        }
    }
}

/// Key-value store in a local SQLite file
pub struct SqliteKeyValueStore {
    pool: SqlitePool,
}

impl SqliteKeyValueStore {
    /// Open (creating if needed) the database file and its schema
    pub async fn open(config: &LocalStoreConfig) -> SyncResult<Self> {
        let journal_mode = if config.enable_wal {
            SqliteJournalMode::Wal
        } else {
            SqliteJournalMode::Delete
        };

        let options = SqliteConnectOptions::new()
            .filename(&config.db_path)
            .create_if_missing(true)
            .journal_mode(journal_mode);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.initialize_schema().await?;

        tracing::debug!(db_path = %config.db_path.display(), "Opened local store");

        Ok(store)
    }

    async fn initialize_schema(&self) -> SyncResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get database pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close database connection
    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl KeyValueStore for SqliteKeyValueStore {
    async fn get(&self, key: &str) -> SyncResult<Option<String>> {
        let row = sqlx::query("SELECT value FROM kv_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(row.try_get("value")?)),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: &str) -> SyncResult<()> {
        sqlx::query(
            r#"
            INSERT INTO kv_store (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// In-process key-value store; contents die with the process
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> SyncResult<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> SyncResult<()> {
        self.entries.write().await.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
