//! Trigger endpoints. Every trigger only validates and enqueues; delivery
//! happens asynchronously in the worker pool.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use hr_common::IngestEnvelope;
use hr_platform::{Accepted, DynamicEventInput};
use serde::Serialize;
use tracing::info;

use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub job_id: String,
    pub event_id: String,
}

impl From<Accepted> for TriggerResponse {
    fn from(a: Accepted) -> Self {
        Self { job_id: a.job_id, event_id: a.event_id }
    }
}

#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub version: u64,
}

type Triggered = Result<(StatusCode, Json<TriggerResponse>), ApiError>;

fn accepted(a: Accepted) -> Triggered {
    Ok((StatusCode::ACCEPTED, Json(a.into())))
}

pub async fn create_event(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    body: Result<Json<IngestEnvelope>, JsonRejection>,
) -> Triggered {
    let Json(envelope) = body?;
    accepted(state.service.create_event(&project_id, envelope).await?)
}

pub async fn create_fanout_event(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    body: Result<Json<IngestEnvelope>, JsonRejection>,
) -> Triggered {
    let Json(envelope) = body?;
    accepted(state.service.create_fanout_event(&project_id, envelope).await?)
}

pub async fn create_broadcast_event(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    body: Result<Json<IngestEnvelope>, JsonRejection>,
) -> Triggered {
    let Json(envelope) = body?;
    accepted(state.service.create_broadcast_event(&project_id, envelope).await?)
}

pub async fn create_dynamic_event(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    body: Result<Json<DynamicEventInput>, JsonRejection>,
) -> Triggered {
    let Json(input) = body?;
    accepted(state.service.create_dynamic_event(&project_id, input).await?)
}

pub async fn replay_event(
    State(state): State<AppState>,
    Path((project_id, event_id)): Path<(String, String)>,
) -> Triggered {
    accepted(state.service.replay_event(&project_id, &event_id).await?)
}

pub async fn sync_subscriptions(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> Result<Json<SyncResponse>, ApiError> {
    let version = state.service.sync_subscriptions(Some(&project_id)).await?;
    info!(project_id = %project_id, version, "Subscription snapshot synced");
    Ok(Json(SyncResponse { version }))
}
