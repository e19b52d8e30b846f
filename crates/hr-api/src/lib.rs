//! HookRelay API
//!
//! HTTP endpoints for:
//! - Event triggers (single, fanout, broadcast, dynamic) and replay
//! - Broadcast subscription snapshot sync
//! - Health and Kubernetes liveness/readiness checks
//! - Prometheus metrics

pub mod error;
pub mod events;
pub mod health;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use hr_platform::EventService;
use hr_queue::TaskQueue;
use metrics_exporter_prometheus::PrometheusHandle;

pub use error::ApiError;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<EventService>,
    pub queue: Arc<dyn TaskQueue>,
    /// Absent when no recorder is installed, e.g. in tests
    pub metrics: Option<PrometheusHandle>,
}

/// Create the full router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/projects/:project_id/events", post(events::create_event))
        .route("/api/v1/projects/:project_id/events/fanout", post(events::create_fanout_event))
        .route("/api/v1/projects/:project_id/events/broadcast", post(events::create_broadcast_event))
        .route("/api/v1/projects/:project_id/events/dynamic", post(events::create_dynamic_event))
        .route("/api/v1/projects/:project_id/events/:event_id/replay", post(events::replay_event))
        .route("/api/v1/projects/:project_id/subscriptions/sync", post(events::sync_subscriptions))
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .route("/metrics", get(health::metrics))
        .with_state(state)
}
