//! Subscription
//!
//! Binds one endpoint to an event-type list plus body and header filter trees.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::delivery::RetryConfig;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FilterConfig {
    /// Event types this subscription accepts; `"*"` accepts all
    #[serde(default = "default_event_types")]
    pub event_types: Vec<String>,
    /// Operator tree applied to the event data
    #[serde(default)]
    pub body: Value,
    /// Operator tree applied to the event headers
    #[serde(default)]
    pub headers: Value,
}

fn default_event_types() -> Vec<String> {
    vec!["*".to_string()]
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            event_types: default_event_types(),
            body: Value::Null,
            headers: Value::Null,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub project_id: String,
    pub endpoint_id: String,
    pub name: String,
    #[serde(default)]
    pub filter: FilterConfig,
    /// Restricts broadcast matching to events from one broker source
    #[serde(default)]
    pub source_id: Option<String>,
    /// Overrides the project retry defaults
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    pub fn new(project_id: impl Into<String>, endpoint_id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: super::new_id(),
            project_id: project_id.into(),
            endpoint_id: endpoint_id.into(),
            name: name.into(),
            filter: FilterConfig::default(),
            source_id: None,
            retry: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_event_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filter.event_types = types.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_body_filter(mut self, filter: Value) -> Self {
        self.filter.body = filter;
        self
    }

    pub fn with_header_filter(mut self, filter: Value) -> Self {
        self.filter.headers = filter;
        self
    }

    pub fn with_source(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }
}
