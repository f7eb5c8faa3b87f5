/// Intake adapter
///
/// Validates inbound events and hands them to the ingestion queue. Accepting
/// an event says nothing about whether it will turn out to be a duplicate.
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{AppError, Result};
use crate::models::Event;
use crate::queue::IngestionQueue;
use crate::stats::StatsAggregator;

#[derive(Clone)]
pub struct Intake {
    queue: IngestionQueue,
    stats: Arc<StatsAggregator>,
}

impl Intake {
    pub fn new(queue: IngestionQueue, stats: Arc<StatsAggregator>) -> Self {
        Self { queue, stats }
    }

    /// Enqueue one validated event and count it as received.
    pub async fn submit(&self, event: Event) -> Result<()> {
        let slot = self.queue.reserve().await?;
        self.stats.record_received();
        debug!(topic = %event.topic, event_id = %event.event_id, "Event accepted");
        slot.send(event);
        Ok(())
    }

    /// Validate and enqueue each document in order.
    ///
    /// Stops at the first failure. Events before it stay enqueued and will
    /// be processed; there is no rollback.
    pub async fn publish(&self, documents: Vec<Value>) -> Result<usize> {
        let total = documents.len();

        for (index, document) in documents.into_iter().enumerate() {
            let outcome = match Event::from_value(document) {
                Ok(event) => self.submit(event).await,
                Err(err) => Err(err),
            };

            if let Err(err) = outcome {
                warn!(
                    index = index,
                    total = total,
                    error = %err,
                    "Publish rejected; earlier events in the batch remain queued"
                );
                return Err(match err {
                    AppError::Validation(msg) => {
                        AppError::Validation(format!("events[{}]: {}", index, msg))
                    }
                    other => other,
                });
            }
        }

        Ok(total)
    }

    pub fn queue(&self) -> &IngestionQueue {
        &self.queue
    }
}
