use idempotent_consumer::DedupStore;
use std::sync::Arc;

use crate::consumer::{ConsumerLoop, ConsumerStatus};
use crate::intake::Intake;
use crate::queue::{IngestionQueue, QueuePolicy};
use crate::stats::StatsAggregator;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DedupStore>,
    pub intake: Intake,
    pub stats: Arc<StatsAggregator>,
    pub consumer: ConsumerStatus,
}

impl AppState {
    pub fn queue(&self) -> &IngestionQueue {
        self.intake.queue()
    }
}

/// Wire queue, stats, and consumer around one store.
///
/// The returned loop is not running yet; the caller decides when to spawn it.
pub fn build_pipeline(store: Arc<dyn DedupStore>, policy: QueuePolicy) -> (AppState, ConsumerLoop) {
    let queue = IngestionQueue::new(policy);
    let stats = Arc::new(StatsAggregator::new());
    let consumer = ConsumerLoop::new(store.clone(), queue.clone(), stats.clone());

    let state = AppState {
        store,
        intake: Intake::new(queue, stats.clone()),
        stats,
        consumer: consumer.status(),
    };

    (state, consumer)
}
