use axum::{Json, Router, routing::get};
use serde::Serialize;

use crate::handler::AppState;

pub fn system_router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: chrono::Utc::now().timestamp_millis(),
    })
}
