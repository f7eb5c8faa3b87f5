/// Ingestion queue
///
/// Strictly FIFO hand-off from intake handlers to the single consumer.
/// Unbounded by default; a bound and its overflow behavior are explicit
/// configuration (`QueuePolicy`).
///
/// The queue also tracks *pending* events: enqueued but not yet resolved by
/// the consumer. Pending drops back to zero only after the consumer marks an
/// event done, which is what [`IngestionQueue::drained`] waits for.
use serde::Deserialize;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError, OwnedPermit};
use tokio::sync::{watch, Mutex};
use tracing::warn;

use crate::metrics;
use crate::models::Event;

/// What enqueue does when a bounded queue is at capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Fail fast with `QueueError::Full`
    #[default]
    Reject,
    /// Wait until the consumer frees a slot
    Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueuePolicy {
    /// Enqueue never blocks or fails due to size. No backpressure.
    #[default]
    Unbounded,
    Bounded {
        capacity: usize,
        overflow: OverflowPolicy,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("queue is full")]
    Full,
    #[error("queue is closed")]
    Closed,
}

#[derive(Clone)]
enum Tx {
    Unbounded(mpsc::UnboundedSender<Event>),
    Bounded(mpsc::Sender<Event>),
}

enum Rx {
    Unbounded(mpsc::UnboundedReceiver<Event>),
    Bounded(mpsc::Receiver<Event>),
}

impl Rx {
    async fn recv(&mut self) -> Option<Event> {
        match self {
            Rx::Unbounded(rx) => rx.recv().await,
            Rx::Bounded(rx) => rx.recv().await,
        }
    }
}

struct Inner {
    policy: QueuePolicy,
    // None once closed
    sender: RwLock<Option<Tx>>,
    // Held by the queue itself so the channel stays open even if the
    // consumer stops.
    receiver: Mutex<Rx>,
    pending: watch::Sender<usize>,
}

/// Cloneable handle to the ingestion queue.
#[derive(Clone)]
pub struct IngestionQueue {
    inner: Arc<Inner>,
}

impl IngestionQueue {
    pub fn new(policy: QueuePolicy) -> Self {
        let (tx, rx) = match policy {
            QueuePolicy::Unbounded => {
                let (tx, rx) = mpsc::unbounded_channel();
                (Tx::Unbounded(tx), Rx::Unbounded(rx))
            }
            QueuePolicy::Bounded { capacity, .. } => {
                let (tx, rx) = mpsc::channel(capacity.max(1));
                (Tx::Bounded(tx), Rx::Bounded(rx))
            }
        };
        let (pending, _) = watch::channel(0);

        Self {
            inner: Arc::new(Inner {
                policy,
                sender: RwLock::new(Some(tx)),
                receiver: Mutex::new(rx),
                pending,
            }),
        }
    }

    /// Claim room for one event.
    ///
    /// Lets intake account for an event only once it is certain to be
    /// enqueued: reserve, record, then [`Slot::send`].
    pub async fn reserve(&self) -> Result<Slot, QueueError> {
        let tx = self
            .inner
            .sender
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(QueueError::Closed)?;

        let kind = match tx {
            Tx::Unbounded(tx) => SlotKind::Unbounded(tx),
            Tx::Bounded(tx) => match self.overflow() {
                OverflowPolicy::Reject => {
                    let permit = tx.try_reserve_owned().map_err(|e| match e {
                        TrySendError::Full(_) => QueueError::Full,
                        TrySendError::Closed(_) => QueueError::Closed,
                    })?;
                    SlotKind::Bounded(permit)
                }
                OverflowPolicy::Block => {
                    let permit = tx
                        .reserve_owned()
                        .await
                        .map_err(|_| QueueError::Closed)?;
                    SlotKind::Bounded(permit)
                }
            },
        };

        Ok(Slot {
            kind,
            queue: self.clone(),
        })
    }

    pub async fn enqueue(&self, event: Event) -> Result<(), QueueError> {
        self.reserve().await?.send(event);
        Ok(())
    }

    /// Next event in arrival order; `None` once closed and empty.
    pub(crate) async fn recv(&self) -> Option<Event> {
        let mut rx = self.inner.receiver.lock().await;
        rx.recv().await
    }

    /// Resolve one pending event (called by the consumer after its decision).
    pub(crate) fn mark_done(&self) {
        let mut remaining = 0;
        self.inner.pending.send_modify(|n| {
            *n = n.saturating_sub(1);
            remaining = *n;
        });
        metrics::QUEUE_PENDING.set(remaining as i64);
    }

    /// Events enqueued but not yet resolved.
    pub fn pending(&self) -> usize {
        *self.inner.pending.borrow()
    }

    /// Wait until every enqueued event has been resolved.
    ///
    /// Never resolves if the consumer has stopped with events pending.
    pub async fn drained(&self) {
        let mut rx = self.inner.pending.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Stop accepting events. Already queued events can still be received.
    pub fn close(&self) {
        self.inner
            .sender
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn is_closed(&self) -> bool {
        self.inner
            .sender
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    fn overflow(&self) -> OverflowPolicy {
        match self.inner.policy {
            QueuePolicy::Bounded { overflow, .. } => overflow,
            QueuePolicy::Unbounded => OverflowPolicy::Reject,
        }
    }

    fn mark_enqueued(&self) {
        let mut total = 0;
        self.inner.pending.send_modify(|n| {
            *n += 1;
            total = *n;
        });
        metrics::QUEUE_PENDING.set(total as i64);
    }
}

enum SlotKind {
    Unbounded(mpsc::UnboundedSender<Event>),
    Bounded(OwnedPermit<Event>),
}

/// Reserved room for exactly one event.
pub struct Slot {
    kind: SlotKind,
    queue: IngestionQueue,
}

impl Slot {
    pub fn send(self, event: Event) {
        // counted before the hand-off so the consumer never resolves an
        // event that is not yet pending
        self.queue.mark_enqueued();

        match self.kind {
            SlotKind::Unbounded(tx) => {
                if let Err(err) = tx.send(event) {
                    // receiver lives in the queue, so this only happens while tearing down
                    warn!(event_id = %err.0.event_id, "Ingestion queue receiver gone, event dropped");
                    self.queue.mark_done();
                }
            }
            SlotKind::Bounded(permit) => {
                permit.send(event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn event(id: &str) -> Event {
        Event {
            topic: "t".to_string(),
            event_id: id.to_string(),
            timestamp: "2023-01-01T00:00:00Z".to_string(),
            source: "s".to_string(),
            payload: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = IngestionQueue::new(QueuePolicy::Unbounded);
        for id in ["e1", "e2", "e3"] {
            queue.enqueue(event(id)).await.unwrap();
        }

        assert_eq!(queue.pending(), 3);
        for id in ["e1", "e2", "e3"] {
            assert_eq!(queue.recv().await.unwrap().event_id, id);
        }
    }

    #[tokio::test]
    async fn test_unbounded_accepts_without_consumer() {
        let queue = IngestionQueue::new(QueuePolicy::Unbounded);
        for i in 0..1_000 {
            queue.enqueue(event(&i.to_string())).await.unwrap();
        }
        assert_eq!(queue.pending(), 1_000);
    }

    #[tokio::test]
    async fn test_bounded_reject_when_full() {
        let queue = IngestionQueue::new(QueuePolicy::Bounded {
            capacity: 2,
            overflow: OverflowPolicy::Reject,
        });

        queue.enqueue(event("1")).await.unwrap();
        queue.enqueue(event("2")).await.unwrap();
        assert_eq!(queue.enqueue(event("3")).await, Err(QueueError::Full));
        assert_eq!(queue.pending(), 2);

        queue.recv().await.unwrap();
        queue.mark_done();
        queue.enqueue(event("3")).await.unwrap();
    }

    #[tokio::test]
    async fn test_bounded_block_waits_for_room() {
        let queue = IngestionQueue::new(QueuePolicy::Bounded {
            capacity: 1,
            overflow: OverflowPolicy::Block,
        });
        queue.enqueue(event("1")).await.unwrap();

        let producer = queue.clone();
        let blocked = tokio::spawn(async move { producer.enqueue(event("2")).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!blocked.is_finished());

        assert_eq!(queue.recv().await.unwrap().event_id, "1");
        timeout(Duration::from_secs(1), blocked)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(queue.recv().await.unwrap().event_id, "2");
    }

    #[tokio::test]
    async fn test_close_rejects_new_events_but_keeps_queued() {
        let queue = IngestionQueue::new(QueuePolicy::Unbounded);
        queue.enqueue(event("1")).await.unwrap();
        queue.close();

        assert!(queue.is_closed());
        assert_eq!(queue.enqueue(event("2")).await, Err(QueueError::Closed));
        assert_eq!(queue.recv().await.unwrap().event_id, "1");
        assert!(queue.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_drained_waits_for_mark_done() {
        let queue = IngestionQueue::new(QueuePolicy::Unbounded);
        timeout(Duration::from_millis(100), queue.drained())
            .await
            .expect("empty queue is drained");

        queue.enqueue(event("1")).await.unwrap();
        queue.recv().await.unwrap();
        assert!(timeout(Duration::from_millis(50), queue.drained())
            .await
            .is_err());

        queue.mark_done();
        timeout(Duration::from_millis(100), queue.drained())
            .await
            .expect("drained after mark_done");
        assert_eq!(queue.pending(), 0);
    }
}
