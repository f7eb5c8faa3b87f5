/// Stats aggregator
///
/// In-memory counters for the running process. Not durable: a restart
/// resets everything to zero while the dedup store keeps its records.
///
/// Intake may only call [`StatsAggregator::record_received`]. The two
/// consumer-side mutations are crate-private and called from
/// `consumer.rs` alone. All fields share one lock so a snapshot never sees
/// `unique_processed` bumped without its topic.
use serde::{Serialize, Serializer};
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::metrics;

#[derive(Debug, Default)]
struct Counters {
    received: u64,
    unique_processed: u64,
    duplicate_dropped: u64,
    topics: HashSet<String>,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub received: u64,
    pub unique_processed: u64,
    pub duplicate_dropped: u64,
    pub topics: Vec<String>,
    #[serde(serialize_with = "as_secs_f64")]
    pub uptime: Duration,
}

impl StatsSnapshot {
    /// Events accepted at intake but not yet resolved by the consumer.
    pub fn in_flight(&self) -> u64 {
        self.received
            .saturating_sub(self.unique_processed + self.duplicate_dropped)
    }
}

fn as_secs_f64<S: Serializer>(uptime: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(uptime.as_secs_f64())
}

#[derive(Debug)]
pub struct StatsAggregator {
    started_at: Instant,
    counters: Mutex<Counters>,
}

impl Default for StatsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            counters: Mutex::new(Counters::default()),
        }
    }

    /// Intake accepted an event onto the queue.
    pub fn record_received(&self) {
        self.lock().received += 1;
        metrics::EVENTS_RECEIVED.inc();
    }

    /// Consumer committed a novel event.
    pub(crate) fn record_unique(&self, topic: &str) {
        let mut counters = self.lock();
        counters.unique_processed += 1;
        if !counters.topics.contains(topic) {
            counters.topics.insert(topic.to_string());
        }
        drop(counters);
        metrics::EVENTS_UNIQUE.inc();
    }

    /// Consumer dropped a duplicate.
    pub(crate) fn record_duplicate(&self) {
        self.lock().duplicate_dropped += 1;
        metrics::EVENTS_DUPLICATE.inc();
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let counters = self.lock();
        let mut topics: Vec<String> = counters.topics.iter().cloned().collect();
        topics.sort();

        StatsSnapshot {
            received: counters.received,
            unique_processed: counters.unique_processed,
            duplicate_dropped: counters.duplicate_dropped,
            topics,
            uptime: self.started_at.elapsed(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
