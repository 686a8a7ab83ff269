//! Liveness/readiness/metrics endpoints, always public (see
//! `extractor_helpers::PUBLIC_PATHS`).

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

use crate::state::AppState;

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

pub async fn live() -> StatusCode {
    StatusCode::OK
}

/// Ready only once storage answers a trivial query; distinguishes "process
/// is up" from "process can actually serve traffic".
pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    if state.storage.health_check().await {
        (StatusCode::OK, Json(serde_json::json!({"status": "ready"})))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(serde_json::json!({"status": "not ready"})))
    }
}

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    ([("content-type", "text/plain; version=0.0.4")], state.metrics.render())
}
