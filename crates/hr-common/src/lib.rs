use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod telemetry;

/// Transport attribute/header carrying the dispatch mode of a broker message.
pub const MESSAGE_TYPE_HEADER: &str = "x-convoy-message-type";

/// Namespace for event ids derived from broker message ids.
const BROKER_EVENT_NAMESPACE: Uuid = Uuid::from_u128(0x6f1d_5c2e_93a4_4b7e_8d21_0c5e_b9a7_31f4);

// ============================================================================
// Dispatch Modes
// ============================================================================

/// How the recipients of an event are chosen.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// One explicitly named endpoint
    Single,
    /// Every active endpoint sharing an owner id
    Fanout,
    /// Every matching subscription in the project, from the in-memory snapshot
    Broadcast,
    /// Endpoint supplied inline and upserted before delivery
    Dynamic,
    /// Redelivery of an existing event to its original target
    Replay,
}

impl DispatchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchMode::Single => "single",
            DispatchMode::Fanout => "fanout",
            DispatchMode::Broadcast => "broadcast",
            DispatchMode::Dynamic => "dynamic",
            DispatchMode::Replay => "replay",
        }
    }

    /// Processor that handles jobs created for this mode
    pub fn processor(&self) -> ProcessorType {
        match self {
            DispatchMode::Single => ProcessorType::CreateEvent,
            DispatchMode::Fanout => ProcessorType::CreateFanoutEvent,
            DispatchMode::Broadcast => ProcessorType::CreateBroadcastEvent,
            DispatchMode::Dynamic => ProcessorType::CreateDynamicEvent,
            DispatchMode::Replay => ProcessorType::ReplayEvent,
        }
    }
}

impl fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DispatchMode {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "single" => Ok(DispatchMode::Single),
            "fanout" => Ok(DispatchMode::Fanout),
            "broadcast" => Ok(DispatchMode::Broadcast),
            "dynamic" => Ok(DispatchMode::Dynamic),
            "replay" => Ok(DispatchMode::Replay),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown variant: {0}")]
pub struct UnknownVariant(pub String);

// ============================================================================
// Queue & Processor Types
// ============================================================================

/// Handler selector carried by every job
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProcessorType {
    CreateEvent,
    CreateFanoutEvent,
    CreateBroadcastEvent,
    CreateDynamicEvent,
    ReplayEvent,
    EventDelivery,
}

impl ProcessorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessorType::CreateEvent => "create_event",
            ProcessorType::CreateFanoutEvent => "create_fanout_event",
            ProcessorType::CreateBroadcastEvent => "create_broadcast_event",
            ProcessorType::CreateDynamicEvent => "create_dynamic_event",
            ProcessorType::ReplayEvent => "replay_event",
            ProcessorType::EventDelivery => "event_delivery",
        }
    }
}

impl fmt::Display for ProcessorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named priority queues. Weights decide how often a worker polls each one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum QueueName {
    CreateEvent,
    Event,
    Stream,
    Scheduler,
}

impl QueueName {
    pub const ALL: [QueueName; 4] = [
        QueueName::CreateEvent,
        QueueName::Event,
        QueueName::Stream,
        QueueName::Scheduler,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::CreateEvent => "create_event",
            QueueName::Event => "event",
            QueueName::Stream => "stream",
            QueueName::Scheduler => "scheduler",
        }
    }

    pub fn default_weight(&self) -> u32 {
        match self {
            QueueName::CreateEvent => 6,
            QueueName::Event => 3,
            QueueName::Stream => 2,
            QueueName::Scheduler => 1,
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueName {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create_event" => Ok(QueueName::CreateEvent),
            "event" => Ok(QueueName::Event),
            "stream" => Ok(QueueName::Stream),
            "scheduler" => Ok(QueueName::Scheduler),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

// ============================================================================
// Event Creation Requests
// ============================================================================

/// Inline endpoint definition used by dynamic events
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DynamicTarget {
    pub url: String,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub event_types: Vec<String>,
}

/// Canonical "create event" request. Produced by both the trigger API and the
/// broker normalizers, consumed by the create-event processors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateEventRequest {
    pub event_id: String,
    pub project_id: String,
    pub mode: DispatchMode,
    pub event_type: String,
    pub data: serde_json::Value,
    #[serde(default)]
    pub endpoint_id: Option<String>,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub source_id: Option<String>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub custom_headers: HashMap<String, String>,
    #[serde(default)]
    pub dynamic: Option<DynamicTarget>,
    pub accepted_at: DateTime<Utc>,
}

/// Payload of a replay job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplayRequest {
    pub project_id: String,
    pub event_id: String,
}

/// Payload of a delivery job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeliveryRequest {
    pub project_id: String,
    pub delivery_id: String,
    /// Trial this job performs; equals the delivery's `num_trials` when it is current
    #[serde(default)]
    pub trial: u32,
}

/// Broker-agnostic JSON body accepted at ingestion
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IngestEnvelope {
    #[serde(default)]
    pub endpoint_id: Option<String>,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub event_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub custom_headers: HashMap<String, String>,
}

/// New random event id for API-originated events
pub fn new_event_id() -> String {
    Uuid::new_v4().to_string()
}

/// Event id for a broker message. Redelivery of the same broker message
/// yields the same id, and therefore the same job id.
pub fn broker_event_id(source_id: &str, broker_message_id: &str) -> String {
    let name = format!("{}:{}", source_id, broker_message_id);
    Uuid::new_v5(&BROKER_EVENT_NAMESPACE, name.as_bytes()).to_string()
}
