use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntGauge, Opts, TextEncoder};
use tracing::warn;

fn register<C>(metric: C) -> C
where
    C: prometheus::core::Collector + Clone + 'static,
{
    if let Err(e) = prometheus::default_registry().register(Box::new(metric.clone())) {
        warn!("Failed to register dedup metric: {}", e);
    }
    metric
}

pub static EVENTS_RECEIVED: Lazy<IntCounter> = Lazy::new(|| {
    register(
        IntCounter::with_opts(Opts::new(
            "dedup_events_received_total",
            "Events accepted by intake and placed on the ingestion queue",
        ))
        .expect("valid metric opts for dedup_events_received_total"),
    )
});

pub static EVENTS_UNIQUE: Lazy<IntCounter> = Lazy::new(|| {
    register(
        IntCounter::with_opts(Opts::new(
            "dedup_events_unique_total",
            "Novel events committed to the dedup store",
        ))
        .expect("valid metric opts for dedup_events_unique_total"),
    )
});

pub static EVENTS_DUPLICATE: Lazy<IntCounter> = Lazy::new(|| {
    register(
        IntCounter::with_opts(Opts::new(
            "dedup_events_duplicate_total",
            "Events dropped because their (topic, event_id) was already recorded",
        ))
        .expect("valid metric opts for dedup_events_duplicate_total"),
    )
});

pub static QUEUE_PENDING: Lazy<IntGauge> = Lazy::new(|| {
    register(
        IntGauge::with_opts(Opts::new(
            "dedup_queue_pending",
            "Events enqueued but not yet resolved by the consumer",
        ))
        .expect("valid metric opts for dedup_queue_pending"),
    )
});

pub static CONSUMER_UP: Lazy<IntGauge> = Lazy::new(|| {
    register(
        IntGauge::with_opts(Opts::new(
            "dedup_consumer_up",
            "1 while the consumer loop is running, 0 once it has stopped",
        ))
        .expect("valid metric opts for dedup_consumer_up"),
    )
});

pub async fn serve_metrics() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
