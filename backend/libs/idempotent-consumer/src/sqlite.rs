//! SQLite-backed dedup store

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use tracing::{debug, info};

use crate::{DedupStore, IdempotencyResult, ProcessedRecord};

/// Dedup ledger persisted in a SQLite database file.
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Clone)]
pub struct SqliteDedupStore {
    pool: SqlitePool,
}

impl SqliteDedupStore {
    /// Open (creating if missing) the database at `database_url`.
    ///
    /// The parent directory of the database file is created as well, so a
    /// fresh data directory works out of the box.
    pub async fn connect(database_url: &str, max_connections: u32) -> IdempotencyResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("Invalid SQLite database URL: {}", database_url))?;

        Self::connect_with(options, max_connections).await
    }

    /// Open a database from explicit connect options.
    pub async fn connect_with(
        options: SqliteConnectOptions,
        max_connections: u32,
    ) -> IdempotencyResult<Self> {
        let options = options
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        if let Some(parent) = options.get_filename().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        info!(max_connections = max_connections, "Dedup store connected");

        Ok(Self { pool })
    }

    /// Apply embedded schema migrations.
    pub async fn migrate(&self) -> IdempotencyResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        debug!("Dedup store migrations applied");
        Ok(())
    }

    /// Close all pooled connections.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl DedupStore for SqliteDedupStore {
    async fn exists(&self, topic: &str, event_id: &str) -> IdempotencyResult<bool> {
        let row = sqlx::query(
            r#"
            SELECT 1 FROM processed_events WHERE topic = ? AND event_id = ?
            "#,
        )
        .bind(topic)
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to check if event is processed")?;

        Ok(row.is_some())
    }

    async fn insert_if_absent(&self, record: &ProcessedRecord) -> IdempotencyResult<bool> {
        let payload = serde_json::to_string(&record.payload)?;

        // ON CONFLICT DO NOTHING: an existing key leaves rows_affected at 0
        let result = sqlx::query(
            r#"
            INSERT INTO processed_events (topic, event_id, timestamp, source, payload, processed_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (topic, event_id) DO NOTHING
            "#,
        )
        .bind(&record.topic)
        .bind(&record.event_id)
        .bind(&record.timestamp)
        .bind(&record.source)
        .bind(&payload)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to record processed event")?;

        let inserted = result.rows_affected() > 0;

        if !inserted {
            debug!(
                topic = %record.topic,
                event_id = %record.event_id,
                "Event already recorded (duplicate)"
            );
        }

        Ok(inserted)
    }

    async fn list_by_topic(&self, topic: &str) -> IdempotencyResult<Vec<ProcessedRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT topic, event_id, timestamp, source, payload
            FROM processed_events
            WHERE topic = ?
            ORDER BY rowid
            "#,
        )
        .bind(topic)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list processed events")?;

        rows.into_iter()
            .map(|row| -> IdempotencyResult<ProcessedRecord> {
                let payload: String = row.try_get("payload")?;
                Ok(ProcessedRecord {
                    topic: row.try_get("topic")?,
                    event_id: row.try_get("event_id")?,
                    timestamp: row.try_get("timestamp")?,
                    source: row.try_get("source")?,
                    payload: serde_json::from_str(&payload)?,
                })
            })
            .collect()
    }
}
