use actix_web::{web, HttpResponse};

use crate::error::Result;
use crate::models::EventsQuery;
use crate::state::AppState;

/// List processed records for one topic.
pub async fn list_events(
    state: web::Data<AppState>,
    query: web::Query<EventsQuery>,
) -> Result<HttpResponse> {
    let records = state.store.list_by_topic(&query.topic).await?;
    Ok(HttpResponse::Ok().json(records))
}
