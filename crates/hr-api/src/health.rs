use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::warn;

use crate::AppState;

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "UP",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

pub async fn liveness() -> Json<serde_json::Value> {
    Json(json!({ "status": "LIVE" }))
}

/// Ready while the task queue answers
pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    match state.queue.stats().await {
        Ok(_) => (StatusCode::OK, Json(json!({ "status": "READY" }))),
        Err(e) => {
            warn!(queue = %state.queue.identifier(), error = %e, "Readiness check failed");
            (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "status": "NOT_READY" })))
        }
    }
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    let output = state.metrics.as_ref().map(|h| h.render()).unwrap_or_default();
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")], output).into_response()
}
