//! Event Delivery
//!
//! The obligation to deliver one event to one endpoint, with its own retry state.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use hr_common::UnknownVariant;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RetryStrategy {
    Linear,
    #[default]
    Exponential,
}

impl RetryStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryStrategy::Linear => "linear",
            RetryStrategy::Exponential => "exponential",
        }
    }
}

impl FromStr for RetryStrategy {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linear" => Ok(RetryStrategy::Linear),
            "exponential" => Ok(RetryStrategy::Exponential),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryConfig {
    #[serde(default)]
    pub strategy: RetryStrategy,
    pub interval_seconds: u64,
    /// Total number of attempts before the delivery is finalized as failed
    pub retry_limit: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Scheduled,
    Processing,
    Success,
    Failed,
    Discarded,
}

impl DeliveryStatus {
    /// No further attempts will be made
    pub fn is_final(&self) -> bool {
        matches!(self, DeliveryStatus::Success | DeliveryStatus::Failed | DeliveryStatus::Discarded)
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeliveryStatus::Scheduled => "scheduled",
            DeliveryStatus::Processing => "processing",
            DeliveryStatus::Success => "success",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Discarded => "discarded",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeliveryMetadata {
    pub strategy: RetryStrategy,
    pub num_trials: u32,
    pub interval_seconds: u64,
    pub retry_limit: u32,
    pub next_send_time: DateTime<Utc>,
}

impl DeliveryMetadata {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            strategy: config.strategy,
            num_trials: 0,
            interval_seconds: config.interval_seconds,
            retry_limit: config.retry_limit,
            next_send_time: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventDelivery {
    pub id: String,
    pub project_id: String,
    pub event_id: String,
    pub endpoint_id: String,
    pub subscription_id: String,
    pub event_type: String,
    pub status: DeliveryStatus,
    pub metadata: DeliveryMetadata,
    /// Custom headers forwarded with every attempt
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    /// Last failure reason, for operators
    #[serde(default)]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EventDelivery {
    pub fn new(
        project_id: impl Into<String>,
        event_id: impl Into<String>,
        endpoint_id: impl Into<String>,
        subscription_id: impl Into<String>,
        event_type: impl Into<String>,
        retry: RetryConfig,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: super::new_id(),
            project_id: project_id.into(),
            event_id: event_id.into(),
            endpoint_id: endpoint_id.into(),
            subscription_id: subscription_id.into(),
            event_type: event_type.into(),
            status: DeliveryStatus::Scheduled,
            metadata: DeliveryMetadata::new(retry),
            headers: HashMap::new(),
            idempotency_key: None,
            description: None,
            created_at: now,
            updated_at: now,
        }
    }
}
