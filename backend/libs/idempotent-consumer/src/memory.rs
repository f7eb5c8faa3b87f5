//! In-memory dedup store
//!
//! Not durable. Used for tests and for embedding the pipeline where
//! persistence across restarts is not required.

use async_trait::async_trait;
use std::collections::HashSet;
use tokio::sync::RwLock;

use crate::{DedupStore, IdempotencyResult, ProcessedRecord};

#[derive(Default)]
struct Ledger {
    keys: HashSet<(String, String)>,
    // commit order
    records: Vec<ProcessedRecord>,
}

/// Dedup ledger held in process memory.
#[derive(Default)]
pub struct MemoryDedupStore {
    ledger: RwLock<Ledger>,
}

impl MemoryDedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed records across all topics.
    pub async fn len(&self) -> usize {
        self.ledger.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl DedupStore for MemoryDedupStore {
    async fn exists(&self, topic: &str, event_id: &str) -> IdempotencyResult<bool> {
        let ledger = self.ledger.read().await;
        Ok(ledger
            .keys
            .contains(&(topic.to_string(), event_id.to_string())))
    }

    async fn insert_if_absent(&self, record: &ProcessedRecord) -> IdempotencyResult<bool> {
        let mut ledger = self.ledger.write().await;
        let key = (record.topic.clone(), record.event_id.clone());

        if !ledger.keys.insert(key) {
            return Ok(false);
        }

        ledger.records.push(record.clone());
        Ok(true)
    }

    async fn list_by_topic(&self, topic: &str) -> IdempotencyResult<Vec<ProcessedRecord>> {
        let ledger = self.ledger.read().await;
        Ok(ledger
            .records
            .iter()
            .filter(|r| r.topic == topic)
            .cloned()
            .collect())
    }
}
