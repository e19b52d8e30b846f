//! Per-source message rewriting

use std::collections::HashMap;

use hr_config::TransformConfig;
use serde_json::Value;

use crate::Rejection;

/// Applied to a parsed message body before it is read as an envelope.
/// The default transform is the identity.
#[derive(Debug, Clone, Default)]
pub struct MessageTransform {
    body_pointer: Option<String>,
    headers: HashMap<String, String>,
}

impl MessageTransform {
    pub fn from_config(config: &TransformConfig) -> Self {
        Self {
            body_pointer: config.body_pointer.clone().filter(|p| !p.is_empty()),
            headers: config.headers.clone(),
        }
    }

    pub fn is_identity(&self) -> bool {
        self.body_pointer.is_none() && self.headers.is_empty()
    }

    /// Extract the envelope from `body`. A string at the pointer is itself
    /// parsed as JSON, which is how SNS wraps notifications delivered via SQS.
    pub fn apply_body(&self, body: Value) -> Result<Value, Rejection> {
        let Some(pointer) = &self.body_pointer else {
            return Ok(body);
        };
        match body.pointer(pointer) {
            Some(Value::String(inner)) => {
                serde_json::from_str(inner).map_err(|e| Rejection::MalformedJson(format!("{} at {}", e, pointer)))
            }
            Some(v) => Ok(v.clone()),
            None => Err(Rejection::InvalidEnvelope(format!("nothing at {}", pointer))),
        }
    }

    /// Source headers under the message's own
    pub fn merge_headers(&self, message_headers: HashMap<String, String>) -> HashMap<String, String> {
        if self.headers.is_empty() {
            return message_headers;
        }
        let mut merged = self.headers.clone();
        merged.extend(message_headers);
        merged
    }
}
