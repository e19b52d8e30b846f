//! Event
//!
//! Immutable record of something that happened. Written once by the
//! create-event processors; only the duplicate flag is ever set afterwards.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use hr_common::{CreateEventRequest, DispatchMode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub project_id: String,
    pub event_type: String,
    /// Mode the event was originally created with
    pub mode: DispatchMode,
    pub data: Value,
    /// Serialized payload as received
    pub raw: String,
    /// Target endpoint ids (single/dynamic)
    #[serde(default)]
    pub endpoints: Vec<String>,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub source_id: Option<String>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub is_duplicate: bool,
    pub created_at: DateTime<Utc>,
}

impl Event {
    pub fn from_request(req: &CreateEventRequest) -> Self {
        Self {
            id: req.event_id.clone(),
            project_id: req.project_id.clone(),
            event_type: req.event_type.clone(),
            mode: req.mode,
            raw: req.data.to_string(),
            data: req.data.clone(),
            endpoints: req.endpoint_id.iter().cloned().collect(),
            owner_id: req.owner_id.clone(),
            source_id: req.source_id.clone(),
            idempotency_key: req.idempotency_key.clone(),
            headers: req.custom_headers.clone(),
            is_duplicate: false,
            created_at: Utc::now(),
        }
    }
}
