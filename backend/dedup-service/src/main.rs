use actix_web::{web, App, HttpServer};
use anyhow::Context;
use dedup_service::consumer::ConsumerError;
use dedup_service::{build_pipeline, handlers, telemetry, AppError, Config};
use idempotent_consumer::{DedupStore, SqliteDedupStore};
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{error, info, warn};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()
        .map_err(AppError::from)
        .context("Failed to load configuration")?;
    telemetry::init_tracing(config.log_format);

    info!(
        database_url = %config.database_url,
        queue = ?config.queue_policy(),
        "Starting dedup-service"
    );

    let store = SqliteDedupStore::connect(&config.database_url, config.db_max_connections)
        .await
        .context("Failed to open dedup store")?;
    store
        .migrate()
        .await
        .context("Failed to run dedup store migrations")?;
    info!("Dedup store ready");

    let shared_store: Arc<dyn DedupStore> = Arc::new(store.clone());
    let (state, consumer) = build_pipeline(shared_store, config.queue_policy());
    let queue = state.queue().clone();
    let consumer = consumer.spawn();

    let app_state = web::Data::new(state);
    let bind_addr = config.bind_addr();
    info!("Listening on {}", bind_addr);

    HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .wrap(tracing_actix_web::TracingLogger::default())
            .configure(handlers::configure)
    })
    .bind(&bind_addr)
    .with_context(|| format!("Failed to bind {}", bind_addr))?
    .run()
    .await
    .context("HTTP server error")?;

    info!(pending = queue.pending(), "HTTP server stopped, draining ingestion queue");
    queue.close();

    let grace = config.shutdown_drain_timeout();
    let status = consumer.status();
    if timeout(grace, status.terminated()).await.is_err() {
        warn!(
            pending = queue.pending(),
            grace_secs = grace.as_secs(),
            "Drain timeout elapsed, abandoning queued events"
        );
        consumer.abort();
    }

    // the loop must be gone before its pool is closed
    match consumer.join().await {
        Ok(()) => info!("Consumer loop drained"),
        Err(ConsumerError::Aborted(reason)) => warn!(reason = %reason, "Consumer loop aborted"),
        Err(err) => error!(error = %err, "Consumer loop had already failed"),
    }

    store.close().await;
    info!("dedup-service stopped");
    Ok(())
}
