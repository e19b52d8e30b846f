//! Delivery Attempt
//!
//! One concrete HTTP try of a delivery. Append-only.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub id: String,
    pub delivery_id: String,
    pub event_id: String,
    pub endpoint_id: String,
    pub project_id: String,
    pub url: String,
    pub method: String,
    /// Address of the outgoing side of the connection
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub request_headers: HashMap<String, String>,
    #[serde(default)]
    pub response_status: Option<u16>,
    #[serde(default)]
    pub response_headers: HashMap<String, String>,
    /// Possibly truncated response body
    #[serde(default)]
    pub response_body: String,
    #[serde(default)]
    pub error: Option<String>,
    pub success: bool,
    pub duration_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl DeliveryAttempt {
    pub fn new(
        delivery: &super::EventDelivery,
        url: impl Into<String>,
        method: impl Into<String>,
    ) -> Self {
        Self {
            id: super::new_id(),
            delivery_id: delivery.id.clone(),
            event_id: delivery.event_id.clone(),
            endpoint_id: delivery.endpoint_id.clone(),
            project_id: delivery.project_id.clone(),
            url: url.into(),
            method: method.into(),
            ip_address: None,
            user_agent: None,
            request_headers: HashMap::new(),
            response_status: None,
            response_headers: HashMap::new(),
            response_body: String::new(),
            error: None,
            success: false,
            duration_ms: 0,
            created_at: Utc::now(),
        }
    }
}
