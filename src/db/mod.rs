use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::DocumentResult;
use crate::models::{NewRecord, Record, RecordFilter, RecordKind};

pub mod records;

/// Persistence seam used by the coordinators
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get_record(&self, id: Uuid) -> DocumentResult<Option<Record>>;

    async fn find_by_stored_path(&self, kind: RecordKind, stored_path: &str) -> DocumentResult<Option<Record>>;

    /// Documents stored directly inside `directory`
    async fn find_documents_in_directory(&self, directory: &str) -> DocumentResult<Vec<Record>>;

    async fn insert_record(&self, record: NewRecord) -> DocumentResult<Record>;

    async fn list_records(&self, filter: &RecordFilter) -> DocumentResult<Vec<Record>>;

    /// Remove the row (and for documents, their attachments). Returns false
    /// when no row was deleted.
    async fn delete_record(&self, record: &Record) -> DocumentResult<bool>;
}

#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        Self::new_with_pool_config(database_url, 5).await
    }

    pub async fn new_with_pool_config(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await?;

        info!("Connected to database {}", database_url);
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations applied");
        Ok(())
    }

    /// Retry transient lock contention; any other error is returned at once
    pub(crate) async fn with_retry<T, F, Fut>(&self, operation: F) -> DocumentResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, sqlx::Error>>,
    {
        const MAX_RETRIES: u32 = 3;
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if is_transient(&e) && attempt < MAX_RETRIES => {
                    let delay_ms = 50 * 2u64.pow(attempt);
                    warn!("Database busy (attempt {}), retrying in {}ms: {}", attempt + 1, delay_ms, e);
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn is_transient(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::PoolTimedOut => true,
        // SQLITE_BUSY and SQLITE_LOCKED
        sqlx::Error::Database(db_error) => {
            matches!(db_error.code().as_deref(), Some("5") | Some("6"))
                || db_error.message().contains("database is locked")
        }
        _ => false,
    }
}
