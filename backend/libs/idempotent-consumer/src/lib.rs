//! # Idempotent Event Store
//!
//! Durable deduplication ledger for event intake. Every event is identified
//! by its `(topic, event_id)` pair; the store remembers each pair it has ever
//! committed, so a consumer can tell "first time seen" from "duplicate" even
//! across service restarts.
//!
//! ## Architecture
//!
//! ```text
//! Intake → Queue → Consumer → DedupStore::exists
//!                      ↓
//!              DedupStore::insert_if_absent
//!                      ↓
//!                   SQLite
//!            (processed_events table)
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use idempotent_consumer::{DedupStore, ProcessedRecord, SqliteDedupStore};
//!
//! # async fn example() -> idempotent_consumer::IdempotencyResult<()> {
//! let store = SqliteDedupStore::connect("sqlite://data/dedup.db", 5).await?;
//! store.migrate().await?;
//!
//! let record = ProcessedRecord {
//!     topic: "orders".to_string(),
//!     event_id: "evt-1".to_string(),
//!     timestamp: "2023-01-01T00:00:00Z".to_string(),
//!     source: "checkout".to_string(),
//!     payload: serde_json::json!({ "amount": 42 }),
//! };
//!
//! if !store.exists(&record.topic, &record.event_id).await? {
//!     // `false` here means another writer committed the key first
//!     let inserted = store.insert_if_absent(&record).await?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency
//!
//! `exists` followed by `insert_if_absent` is only race-free with a single
//! writer. `insert_if_absent` itself is an atomic compare-and-insert on the
//! composite key (`ON CONFLICT DO NOTHING`), so callers that may run writers
//! in parallel should treat its return value as the dedup decision.
//!
//! ## Ordering
//!
//! Both stores return `list_by_topic` results in commit order. HTTP callers
//! are not promised any order; tests rely on it to observe FIFO processing.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

mod error;
mod memory;
mod sqlite;

pub use error::{IdempotencyError, IdempotencyResult};
pub use memory::MemoryDedupStore;
pub use sqlite::SqliteDedupStore;

/// Durable form of an event once it has been accepted as novel.
///
/// One record exists per distinct `(topic, event_id)`. Records are never
/// updated or deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedRecord {
    pub topic: String,
    pub event_id: String,
    /// ISO-8601 timestamp as supplied by the publisher
    pub timestamp: String,
    pub source: String,
    /// Opaque document, returned verbatim on read
    pub payload: serde_json::Value,
}

/// Storage contract for the dedup ledger.
///
/// Implementations must be safe to share across tasks (`Arc<dyn DedupStore>`).
#[async_trait]
pub trait DedupStore: Send + Sync {
    /// True iff a record for the key has ever been committed.
    async fn exists(&self, topic: &str, event_id: &str) -> IdempotencyResult<bool>;

    /// Commit the record if its key is absent.
    ///
    /// Returns `Ok(false)` when the key is already present. That is an
    /// expected outcome, not an error.
    async fn insert_if_absent(&self, record: &ProcessedRecord) -> IdempotencyResult<bool>;

    /// All records committed for a topic.
    async fn list_by_topic(&self, topic: &str) -> IdempotencyResult<Vec<ProcessedRecord>>;
}
