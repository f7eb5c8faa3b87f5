/// Liveness and readiness probes
use actix_web::{web, HttpResponse};
use serde::Serialize;

use crate::consumer::ConsumerState;
use crate::state::AppState;

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    consumer: ConsumerState,
    pending: usize,
}

/// Process is up. Says nothing about the consumer.
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

/// Ready while the consumer loop is still running.
pub async fn ready(state: web::Data<AppState>) -> HttpResponse {
    let consumer = state.consumer.current();
    let ready = !consumer.is_terminal();
    let body = ReadinessResponse {
        ready,
        consumer,
        pending: state.queue().pending(),
    };

    if ready {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::ServiceUnavailable().json(body)
    }
}
