/// Dedup Service Library
///
/// Accepts events over HTTP, queues them, and commits each `(topic, event_id)`
/// at most once to a durable store using a single consumer loop.
///
/// # Modules
///
/// - `handlers`: HTTP endpoints (publish, events, stats, health)
/// - `intake`: Validation and enqueue
/// - `queue`: FIFO ingestion queue between intake and consumer
/// - `consumer`: Single-writer dedup loop
/// - `stats`: In-memory counters
/// - `models`: Event and request/response types
/// - `error`: Error types and HTTP mapping
/// - `config`: Configuration management
/// - `metrics`: Prometheus metrics
/// - `telemetry`: Tracing setup
pub mod config;
pub mod consumer;
pub mod error;
pub mod handlers;
pub mod intake;
pub mod metrics;
pub mod models;
pub mod queue;
pub mod state;
pub mod stats;
pub mod telemetry;

pub use config::Config;
pub use error::{AppError, Result};
pub use state::{build_pipeline, AppState};
