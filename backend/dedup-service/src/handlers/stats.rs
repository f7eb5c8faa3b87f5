use actix_web::{web, HttpResponse};

use crate::state::AppState;

pub async fn get_stats(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.stats.snapshot())
}
