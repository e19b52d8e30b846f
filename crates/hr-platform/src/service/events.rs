//! Event trigger service
//!
//! Validation gate shared by the HTTP trigger surface and the broker
//! normalizers. A request that passes is enqueued as a create-event job keyed
//! `<mode>:<projectID>:<eventID>`; a request that fails is rejected with no
//! event created.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use hr_common::{
    new_event_id, CreateEventRequest, DispatchMode, DynamicTarget, IngestEnvelope, ProcessorType, QueueName,
    ReplayRequest,
};
use hr_queue::{job_id, EnqueueOutcome, Job, TaskQueue};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{PlatformError, Result};
use crate::repository::Repositories;
use crate::snapshot::SubscriptionSnapshot;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Accepted {
    pub job_id: String,
    pub event_id: String,
    pub outcome: EnqueueOutcome,
}

/// Dynamic event: the endpoint is supplied inline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynamicEventInput {
    pub url: String,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub event_types: Vec<String>,
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub custom_headers: HashMap<String, String>,
}

pub struct EventService {
    repos: Repositories,
    queue: Arc<dyn TaskQueue>,
    snapshot: Arc<SubscriptionSnapshot>,
    max_job_retries: u32,
}

impl EventService {
    pub fn new(repos: Repositories, queue: Arc<dyn TaskQueue>, snapshot: Arc<SubscriptionSnapshot>) -> Self {
        Self { repos, queue, snapshot, max_job_retries: 5 }
    }

    pub fn with_max_job_retries(mut self, max_job_retries: u32) -> Self {
        self.max_job_retries = max_job_retries;
        self
    }

    pub async fn create_event(&self, project_id: &str, envelope: IngestEnvelope) -> Result<Accepted> {
        self.submit(request_from(project_id, DispatchMode::Single, envelope)).await
    }

    pub async fn create_fanout_event(&self, project_id: &str, envelope: IngestEnvelope) -> Result<Accepted> {
        self.submit(request_from(project_id, DispatchMode::Fanout, envelope)).await
    }

    pub async fn create_broadcast_event(&self, project_id: &str, envelope: IngestEnvelope) -> Result<Accepted> {
        self.submit(request_from(project_id, DispatchMode::Broadcast, envelope)).await
    }

    pub async fn create_dynamic_event(&self, project_id: &str, input: DynamicEventInput) -> Result<Accepted> {
        let req = CreateEventRequest {
            event_id: new_event_id(),
            project_id: project_id.to_string(),
            mode: DispatchMode::Dynamic,
            event_type: input.event_type,
            data: input.data,
            endpoint_id: None,
            owner_id: None,
            source_id: None,
            idempotency_key: input.idempotency_key,
            custom_headers: input.custom_headers,
            dynamic: Some(DynamicTarget {
                url: input.url,
                secret: input.secret,
                event_types: input.event_types,
            }),
            accepted_at: Utc::now(),
        };
        self.submit(req).await
    }

    /// Re-enqueue an existing event for redelivery to its original target
    pub async fn replay_event(&self, project_id: &str, event_id: &str) -> Result<Accepted> {
        let event = self
            .repos
            .events
            .find_event(project_id, event_id)
            .await?
            .ok_or_else(|| PlatformError::not_found("Event", event_id))?;

        let id = job_id(DispatchMode::Replay, project_id, &event.id);
        let payload = serde_json::to_value(ReplayRequest {
            project_id: project_id.to_string(),
            event_id: event.id.clone(),
        })?;
        let job = Job::new(id.clone(), ProcessorType::ReplayEvent, QueueName::CreateEvent, project_id, payload)
            .with_max_retry(self.max_job_retries);

        let outcome = self.queue.enqueue(job).await?;
        info!(project_id = %project_id, event_id = %event.id, job_id = %id, outcome = ?outcome, "Replay enqueued");
        Ok(Accepted { job_id: id, event_id: event.id, outcome })
    }

    /// Refresh the broadcast snapshot, for one project or all
    pub async fn sync_subscriptions(&self, project_id: Option<&str>) -> Result<u64> {
        match project_id {
            Some(p) => self.snapshot.sync_project(p).await,
            None => self.snapshot.sync().await,
        }
    }

    /// Validate and enqueue a canonical create-event request
    pub async fn submit(&self, req: CreateEventRequest) -> Result<Accepted> {
        self.validate(&req).await?;

        let id = job_id(req.mode, &req.project_id, &req.event_id);
        let payload = serde_json::to_value(&req)?;
        let job = Job::new(id.clone(), req.mode.processor(), QueueName::CreateEvent, req.project_id.clone(), payload)
            .with_max_retry(self.max_job_retries);

        let outcome = self.queue.enqueue(job).await?;
        debug!(
            job_id = %id,
            event_id = %req.event_id,
            mode = %req.mode,
            outcome = ?outcome,
            "Create-event job enqueued"
        );
        Ok(Accepted { job_id: id, event_id: req.event_id, outcome })
    }

    pub async fn validate(&self, req: &CreateEventRequest) -> Result<()> {
        if req.event_type.trim().is_empty() {
            return Err(PlatformError::validation("event_type is required"));
        }
        if !req.data.is_object() {
            return Err(PlatformError::validation("data must be a JSON object"));
        }
        if self.repos.projects.find_project(&req.project_id).await?.is_none() {
            return Err(PlatformError::validation(format!("unknown project {}", req.project_id)));
        }

        match req.mode {
            DispatchMode::Single => {
                let endpoint_id = non_empty(req.endpoint_id.as_deref())
                    .ok_or_else(|| PlatformError::validation("endpoint_id is required for single events"))?;
                if self.repos.endpoints.find_endpoint(&req.project_id, endpoint_id).await?.is_none() {
                    return Err(PlatformError::validation(format!("unknown endpoint {}", endpoint_id)));
                }
            }
            DispatchMode::Fanout => {
                non_empty(req.owner_id.as_deref())
                    .ok_or_else(|| PlatformError::validation("owner_id is required for fanout events"))?;
            }
            DispatchMode::Broadcast => {}
            DispatchMode::Dynamic => {
                let target = req
                    .dynamic
                    .as_ref()
                    .ok_or_else(|| PlatformError::validation("dynamic events require an endpoint url"))?;
                if !(target.url.starts_with("http://") || target.url.starts_with("https://")) {
                    return Err(PlatformError::validation(format!("invalid endpoint url {}", target.url)));
                }
            }
            DispatchMode::Replay => {
                return Err(PlatformError::validation("replay is triggered by event id"));
            }
        }
        Ok(())
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.filter(|v| !v.trim().is_empty())
}

fn request_from(project_id: &str, mode: DispatchMode, envelope: IngestEnvelope) -> CreateEventRequest {
    CreateEventRequest {
        event_id: new_event_id(),
        project_id: project_id.to_string(),
        mode,
        event_type: envelope.event_type,
        data: envelope.data,
        endpoint_id: envelope.endpoint_id,
        owner_id: envelope.owner_id,
        source_id: None,
        idempotency_key: envelope.idempotency_key,
        custom_headers: envelope.custom_headers,
        dynamic: None,
        accepted_at: Utc::now(),
    }
}
