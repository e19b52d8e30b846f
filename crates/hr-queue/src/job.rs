use std::collections::HashMap;

use chrono::{DateTime, Utc};
use hr_common::{DispatchMode, ProcessorType, QueueName};
use serde::{Deserialize, Serialize};

/// Deterministic job id: `<mode>:<projectID>:<entityID>`.
///
/// Logically identical work always yields the same id, so the queue's dedup
/// window absorbs repeats (e.g. a broker redelivering the same message).
pub fn job_id(mode: DispatchMode, project_id: &str, entity_id: &str) -> String {
    format!("{}:{}:{}", mode.as_str(), project_id, entity_id)
}

/// Delivery job id: `delivery:<projectID>:<deliveryID>:<trial>`
pub fn delivery_job_id(project_id: &str, delivery_id: &str, trial: u32) -> String {
    format!("delivery:{}:{}:{}", project_id, delivery_id, trial)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnqueueOutcome {
    Enqueued,
    /// A job with this id is already known; nothing was enqueued
    Duplicate,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: String,
    pub processor: ProcessorType,
    pub queue: QueueName,
    pub project_id: String,
    pub payload: serde_json::Value,
    /// Handler failures so far
    #[serde(default)]
    pub retried: u32,
    pub max_retry: u32,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub process_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl Job {
    pub fn new(
        id: impl Into<String>,
        processor: ProcessorType,
        queue: QueueName,
        project_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            processor,
            queue,
            project_id: project_id.into(),
            payload,
            retried: 0,
            max_retry: 5,
            enqueued_at: Utc::now(),
            process_at: None,
            last_error: None,
        }
    }

    pub fn with_max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = max_retry;
        self
    }

    pub fn process_at(mut self, at: DateTime<Utc>) -> Self {
        self.process_at = Some(at);
        self
    }

    /// Scheduled strictly in the future relative to `now`
    pub fn is_delayed(&self, now: DateTime<Utc>) -> bool {
        self.process_at.map(|at| at > now).unwrap_or(false)
    }

    pub fn retries_exhausted(&self) -> bool {
        self.retried >= self.max_retry
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadJob {
    pub job: Job,
    pub error: String,
    pub died_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueueStats {
    /// Ready jobs per queue name
    pub pending: HashMap<String, u64>,
    pub scheduled: u64,
    pub in_flight: u64,
    pub dead: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_format() {
        assert_eq!(job_id(DispatchMode::Single, "p1", "ev1"), "single:p1:ev1");
        assert_eq!(job_id(DispatchMode::Fanout, "p1", "ev1"), "fanout:p1:ev1");
        assert_eq!(job_id(DispatchMode::Replay, "p1", "ev1"), "replay:p1:ev1");
        assert_eq!(delivery_job_id("p1", "d1", 2), "delivery:p1:d1:2");
    }

    #[test]
    fn test_job_ids_byte_identical_across_calls() {
        let a = job_id(DispatchMode::Broadcast, "proj-7", "0b6c9f5e");
        let b = job_id(DispatchMode::Broadcast, "proj-7", "0b6c9f5e");
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_job_serde_uses_snake_case_names() {
        let job = Job::new("single:p:e", ProcessorType::CreateEvent, QueueName::CreateEvent, "p", serde_json::json!({}));
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["processor"], "create_event");
        assert_eq!(value["queue"], "create_event");
    }
}
