/// Publish handler - accepts one event or a batch
use actix_web::{web, HttpResponse};
use tracing::info;

use crate::error::Result;
use crate::models::{PublishRequest, PublishResponse};
use crate::state::AppState;

/// Enqueue events for deduplication.
///
/// `200` means accepted onto the queue, not processed. A validation failure
/// part way through a batch returns `400` and leaves earlier events queued.
pub async fn publish(
    state: web::Data<AppState>,
    req: web::Json<PublishRequest>,
) -> Result<HttpResponse> {
    let documents = req.into_inner().events.into_vec();
    let count = state.intake.publish(documents).await?;

    info!(count = count, pending = state.queue().pending(), "Events accepted");

    Ok(HttpResponse::Ok().json(PublishResponse::accepted(count)))
}
