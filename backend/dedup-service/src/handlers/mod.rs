/// HTTP handlers
///
/// - Publish: validate and enqueue events
/// - Events: list processed records for a topic
/// - Stats: in-memory counters
/// - Health: liveness and readiness probes
pub mod events;
pub mod health;
pub mod publish;
pub mod stats;

use actix_web::web;

use crate::error::AppError;
use crate::metrics;

pub use events::list_events;
pub use health::{health, ready};
pub use publish::publish;
pub use stats::get_stats;

/// Register all routes plus the extractor error handlers.
///
/// Malformed bodies and query strings surface as `AppError::Validation` so
/// every 400 carries the same JSON shape.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default()
            .error_handler(|err, _req| AppError::Validation(err.to_string()).into()),
    )
    .app_data(
        web::QueryConfig::default()
            .error_handler(|err, _req| AppError::Validation(err.to_string()).into()),
    )
    .route("/publish", web::post().to(publish))
    .route("/events", web::get().to(list_events))
    .route("/stats", web::get().to(get_stats))
    .route("/health", web::get().to(health))
    .route("/ready", web::get().to(ready))
    .route("/metrics", web::get().to(metrics::serve_metrics));
}
