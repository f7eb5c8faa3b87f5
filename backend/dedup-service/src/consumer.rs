/// Consumer loop
///
/// The single worker that drains the ingestion queue:
///
/// ```text
/// Idle → (dequeue) → Checking → Duplicate → Idle
///                             → Persisting → Idle
/// ```
///
/// A storage failure is terminal. The loop stops in `Failed`, the event in
/// flight and everything queued behind it stay unprocessed, and intake keeps
/// accepting. There is no retry and no restart.
use idempotent_consumer::{DedupStore, IdempotencyError};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::metrics;
use crate::models::Event;
use crate::queue::IngestionQueue;
use crate::stats::StatsAggregator;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum ConsumerState {
    Idle,
    Checking,
    Persisting,
    /// Terminal: a store operation failed
    Failed(String),
    /// Terminal: the queue was closed and fully drained
    Closed,
}

impl ConsumerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConsumerState::Failed(_) | ConsumerState::Closed)
    }
}

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("storage failure: {0}")]
    Storage(#[from] IdempotencyError),

    /// The loop task panicked or was cancelled
    #[error("consumer task aborted: {0}")]
    Aborted(String),
}

/// Outcome of one dedup decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Novel,
    Duplicate,
}

/// Read-only view of the consumer's state.
#[derive(Clone)]
pub struct ConsumerStatus {
    rx: watch::Receiver<ConsumerState>,
}

impl ConsumerStatus {
    pub fn current(&self) -> ConsumerState {
        self.rx.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        !self.rx.borrow().is_terminal()
    }

    /// Wait until the consumer reaches `Failed` or `Closed`.
    pub async fn terminated(&self) -> ConsumerState {
        let mut rx = self.rx.clone();
        if let Ok(state) = rx.wait_for(|state| state.is_terminal()).await {
            return state.clone();
        }
        // sender dropped without a terminal state
        let state = rx.borrow().clone();
        state
    }
}

pub struct ConsumerLoop {
    store: Arc<dyn DedupStore>,
    queue: IngestionQueue,
    stats: Arc<StatsAggregator>,
    state: watch::Sender<ConsumerState>,
}

impl ConsumerLoop {
    pub fn new(
        store: Arc<dyn DedupStore>,
        queue: IngestionQueue,
        stats: Arc<StatsAggregator>,
    ) -> Self {
        let (state, _) = watch::channel(ConsumerState::Idle);
        Self {
            store,
            queue,
            stats,
            state,
        }
    }

    pub fn status(&self) -> ConsumerStatus {
        ConsumerStatus {
            rx: self.state.subscribe(),
        }
    }

    /// Run on a dedicated tokio task.
    pub fn spawn(self) -> ConsumerHandle {
        let status = self.status();
        let join = tokio::spawn(self.run());
        ConsumerHandle { join, status }
    }

    /// Drain the queue until it is closed or the store fails.
    pub async fn run(self) -> Result<(), ConsumerError> {
        info!("Consumer loop starting");
        metrics::CONSUMER_UP.set(1);
        let _guard = TerminalGuard(&self.state);

        while let Some(event) = self.queue.recv().await {
            let topic = event.topic.clone();
            let event_id = event.event_id.clone();

            if let Err(err) = self.process(event).await {
                error!(
                    topic = %topic,
                    event_id = %event_id,
                    error = %err,
                    transient = matches!(err, ConsumerError::Storage(ref cause) if cause.is_transient()),
                    pending = self.queue.pending(),
                    "Consumer loop terminated; queued events will not be processed"
                );
                metrics::CONSUMER_UP.set(0);
                self.state
                    .send_replace(ConsumerState::Failed(err.to_string()));
                return Err(err);
            }

            self.state.send_replace(ConsumerState::Idle);
            self.queue.mark_done();
        }

        info!("Ingestion queue closed, consumer loop exiting");
        metrics::CONSUMER_UP.set(0);
        self.state.send_replace(ConsumerState::Closed);
        Ok(())
    }

    async fn process(&self, event: Event) -> Result<Decision, ConsumerError> {
        self.state.send_replace(ConsumerState::Checking);

        if self.store.exists(&event.topic, &event.event_id).await? {
            self.stats.record_duplicate();
            debug!(topic = %event.topic, event_id = %event.event_id, "Duplicate dropped");
            return Ok(Decision::Duplicate);
        }

        self.state.send_replace(ConsumerState::Persisting);
        let record = event.into_record();

        // insert_if_absent is authoritative; false means another writer got there first
        if self.store.insert_if_absent(&record).await? {
            self.stats.record_unique(&record.topic);
            info!(topic = %record.topic, event_id = %record.event_id, "Processed");
            Ok(Decision::Novel)
        } else {
            self.stats.record_duplicate();
            warn!(
                topic = %record.topic,
                event_id = %record.event_id,
                "Key committed between check and insert, counted as duplicate"
            );
            Ok(Decision::Duplicate)
        }
    }
}

/// Publishes `Failed` if the loop future is dropped or unwinds before it
/// reached a terminal state.
struct TerminalGuard<'a>(&'a watch::Sender<ConsumerState>);

impl Drop for TerminalGuard<'_> {
    fn drop(&mut self) {
        let terminal = self.0.borrow().is_terminal();
        if !terminal {
            metrics::CONSUMER_UP.set(0);
            self.0.send_replace(ConsumerState::Failed(
                "consumer loop stopped unexpectedly".to_string(),
            ));
        }
    }
}

/// A spawned consumer loop.
pub struct ConsumerHandle {
    join: JoinHandle<Result<(), ConsumerError>>,
    status: ConsumerStatus,
}

impl ConsumerHandle {
    pub fn status(&self) -> ConsumerStatus {
        self.status.clone()
    }

    /// Cancel the loop. Whatever is still queued stays unprocessed.
    pub fn abort(&self) {
        self.join.abort();
    }

    /// Wait for the loop task to end.
    pub async fn join(self) -> Result<(), ConsumerError> {
        match self.join.await {
            Ok(result) => result,
            Err(join_err) => Err(ConsumerError::Aborted(join_err.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::QueuePolicy;
    use idempotent_consumer::{IdempotencyResult, MemoryDedupStore, ProcessedRecord};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::time::timeout;

    fn event(topic: &str, id: &str) -> Event {
        Event {
            topic: topic.to_string(),
            event_id: id.to_string(),
            timestamp: "2023-01-01T00:00:00Z".to_string(),
            source: "test".to_string(),
            payload: serde_json::json!({}),
        }
    }

    /// Store that reports every key absent but refuses duplicate inserts,
    /// as if another writer committed between the two calls.
    #[derive(Default)]
    struct RacingStore {
        inner: MemoryDedupStore,
    }

    #[async_trait::async_trait]
    impl DedupStore for RacingStore {
        async fn exists(&self, _topic: &str, _event_id: &str) -> IdempotencyResult<bool> {
            Ok(false)
        }

        async fn insert_if_absent(&self, record: &ProcessedRecord) -> IdempotencyResult<bool> {
            self.inner.insert_if_absent(record).await
        }

        async fn list_by_topic(&self, topic: &str) -> IdempotencyResult<Vec<ProcessedRecord>> {
            self.inner.list_by_topic(topic).await
        }
    }

    /// Store whose inserts fail once `broken` is set.
    #[derive(Default)]
    struct BreakableStore {
        inner: MemoryDedupStore,
        broken: AtomicBool,
    }

    #[async_trait::async_trait]
    impl DedupStore for BreakableStore {
        async fn exists(&self, topic: &str, event_id: &str) -> IdempotencyResult<bool> {
            self.inner.exists(topic, event_id).await
        }

        async fn insert_if_absent(&self, record: &ProcessedRecord) -> IdempotencyResult<bool> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(IdempotencyError::Other(anyhow::anyhow!("disk I/O error")));
            }
            self.inner.insert_if_absent(record).await
        }

        async fn list_by_topic(&self, topic: &str) -> IdempotencyResult<Vec<ProcessedRecord>> {
            self.inner.list_by_topic(topic).await
        }
    }

    /// Store whose lookups fail, or never complete when `hang` is set.
    #[derive(Default)]
    struct LookupFailStore {
        hang: bool,
    }

    #[async_trait::async_trait]
    impl DedupStore for LookupFailStore {
        async fn exists(&self, _topic: &str, _event_id: &str) -> IdempotencyResult<bool> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            Err(IdempotencyError::Other(anyhow::anyhow!("lookup failed")))
        }

        async fn insert_if_absent(&self, _record: &ProcessedRecord) -> IdempotencyResult<bool> {
            Ok(true)
        }

        async fn list_by_topic(&self, _topic: &str) -> IdempotencyResult<Vec<ProcessedRecord>> {
            Ok(Vec::new())
        }
    }

    fn setup(store: Arc<dyn DedupStore>) -> (ConsumerLoop, IngestionQueue, Arc<StatsAggregator>) {
        let queue = IngestionQueue::new(QueuePolicy::Unbounded);
        let stats = Arc::new(StatsAggregator::new());
        let consumer = ConsumerLoop::new(store, queue.clone(), stats.clone());
        (consumer, queue, stats)
    }

    #[tokio::test]
    async fn test_novel_then_duplicate() {
        let store = Arc::new(MemoryDedupStore::new());
        let (consumer, _queue, stats) = setup(store.clone());

        assert_eq!(consumer.process(event("t", "1")).await.unwrap(), Decision::Novel);
        assert_eq!(
            consumer.process(event("t", "1")).await.unwrap(),
            Decision::Duplicate
        );

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.unique_processed, 1);
        assert_eq!(snapshot.duplicate_dropped, 1);
        assert_eq!(snapshot.topics, vec!["t"]);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_lost_insert_race_counts_as_duplicate() {
        let store = Arc::new(RacingStore::default());
        let (consumer, _queue, stats) = setup(store.clone());

        assert_eq!(consumer.process(event("t", "1")).await.unwrap(), Decision::Novel);
        assert_eq!(
            consumer.process(event("t", "1")).await.unwrap(),
            Decision::Duplicate
        );
        assert_eq!(stats.snapshot().unique_processed, 1);
        assert_eq!(stats.snapshot().duplicate_dropped, 1);
    }

    #[tokio::test]
    async fn test_close_drains_then_stops() {
        let store = Arc::new(MemoryDedupStore::new());
        let (consumer, queue, stats) = setup(store.clone());

        for id in ["1", "2", "1"] {
            stats.record_received();
            queue.enqueue(event("t", id)).await.unwrap();
        }
        queue.close();

        let handle = consumer.spawn();
        let status = handle.status();
        timeout(Duration::from_secs(1), handle.join())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(status.current(), ConsumerState::Closed);
        assert_eq!(queue.pending(), 0);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.unique_processed, 2);
        assert_eq!(snapshot.duplicate_dropped, 1);
        assert_eq!(snapshot.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_storage_failure_is_terminal() {
        let store = Arc::new(BreakableStore::default());
        let (consumer, queue, stats) = setup(store.clone());
        let handle = consumer.spawn();
        let status = handle.status();

        queue.enqueue(event("t", "ok")).await.unwrap();
        timeout(Duration::from_secs(1), queue.drained())
            .await
            .unwrap();

        store.broken.store(true, Ordering::SeqCst);
        queue.enqueue(event("t", "boom")).await.unwrap();
        queue.enqueue(event("t", "never")).await.unwrap();

        let state = timeout(Duration::from_secs(1), status.terminated())
            .await
            .unwrap();
        assert!(matches!(state, ConsumerState::Failed(ref reason) if reason.contains("disk I/O")));
        assert!(!status.is_running());
        assert!(matches!(
            handle.join().await,
            Err(ConsumerError::Storage(_))
        ));

        // intake still accepts after the crash
        queue.enqueue(event("t", "after")).await.unwrap();
        assert_eq!(queue.pending(), 3);
        assert_eq!(stats.snapshot().unique_processed, 1);
        assert!(!store.inner.exists("t", "never").await.unwrap());
    }

    #[tokio::test]
    async fn test_lookup_failure_is_terminal() {
        let (consumer, queue, stats) = setup(Arc::new(LookupFailStore::default()));
        let intake = crate::intake::Intake::new(queue.clone(), stats.clone());
        let handle = consumer.spawn();
        let status = handle.status();

        let documents = ["1", "2"]
            .iter()
            .map(|id| serde_json::to_value(event("t", id)).unwrap())
            .collect();
        assert_eq!(intake.publish(documents).await.unwrap(), 2);

        let state = timeout(Duration::from_secs(1), status.terminated())
            .await
            .unwrap();
        assert!(matches!(state, ConsumerState::Failed(ref reason) if reason.contains("lookup failed")));
        assert!(matches!(handle.join().await, Err(ConsumerError::Storage(_))));

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.received, 2);
        assert_eq!(snapshot.unique_processed, 0);
        assert_eq!(snapshot.duplicate_dropped, 0);
        assert_eq!(queue.pending(), 2);
    }

    #[tokio::test]
    async fn test_aborted_loop_reports_failed() {
        let (consumer, queue, _stats) = setup(Arc::new(LookupFailStore { hang: true }));
        let handle = consumer.spawn();
        let status = handle.status();

        queue.enqueue(event("t", "stuck")).await.unwrap();
        timeout(Duration::from_secs(1), async {
            while status.current() != ConsumerState::Checking {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        handle.abort();
        assert!(matches!(handle.join().await, Err(ConsumerError::Aborted(_))));
        assert!(matches!(status.current(), ConsumerState::Failed(_)));
        assert!(!status.is_running());
        assert_eq!(queue.pending(), 1);
    }
}
