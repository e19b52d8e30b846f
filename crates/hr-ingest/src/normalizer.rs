//! Broker message normalizer
//!
//! Reads the dispatch mode from the `x-convoy-message-type` attribute
//! (missing means single), parses the JSON envelope and produces a canonical
//! [`CreateEventRequest`]. Event ids are derived from the broker message id so
//! a redelivered message maps onto the same create-event job.

use chrono::Utc;
use hr_common::{broker_event_id, CreateEventRequest, DispatchMode, IngestEnvelope, MESSAGE_TYPE_HEADER};
use serde_json::Value;

use crate::source::RawMessage;
use crate::transform::MessageTransform;
use crate::Rejection;

#[derive(Debug, Clone)]
pub struct Normalizer {
    source_id: String,
    project_id: String,
    transform: MessageTransform,
}

impl Normalizer {
    pub fn new(source_id: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            project_id: project_id.into(),
            transform: MessageTransform::default(),
        }
    }

    pub fn with_transform(mut self, transform: MessageTransform) -> Self {
        self.transform = transform;
        self
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn mode(message: &RawMessage) -> Result<DispatchMode, Rejection> {
        let Some(raw) = message.attribute(MESSAGE_TYPE_HEADER).filter(|v| !v.trim().is_empty()) else {
            return Ok(DispatchMode::Single);
        };
        match raw.parse::<DispatchMode>() {
            Ok(mode @ (DispatchMode::Single | DispatchMode::Fanout | DispatchMode::Broadcast)) => Ok(mode),
            _ => Err(Rejection::UnsupportedMode(raw.to_string())),
        }
    }

    pub fn normalize(&self, message: &RawMessage) -> Result<CreateEventRequest, Rejection> {
        let mode = Self::mode(message)?;

        let body: Value =
            serde_json::from_slice(&message.body).map_err(|e| Rejection::MalformedJson(e.to_string()))?;
        let body = self.transform.apply_body(body)?;
        if !body.is_object() {
            return Err(Rejection::InvalidEnvelope("envelope must be a JSON object".into()));
        }
        let envelope: IngestEnvelope =
            serde_json::from_value(body).map_err(|e| Rejection::InvalidEnvelope(e.to_string()))?;

        Ok(CreateEventRequest {
            event_id: broker_event_id(&self.source_id, &message.id),
            project_id: self.project_id.clone(),
            mode,
            event_type: envelope.event_type,
            data: envelope.data,
            endpoint_id: envelope.endpoint_id,
            owner_id: envelope.owner_id,
            source_id: Some(self.source_id.clone()),
            idempotency_key: envelope.idempotency_key,
            custom_headers: self.transform.merge_headers(envelope.custom_headers),
            dynamic: None,
            accepted_at: Utc::now(),
        })
    }
}
