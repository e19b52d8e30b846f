//! HookRelay Task Queue
//!
//! Job-id based deduplication over named priority queues:
//! - Deterministic job ids (`<mode>:<projectID>:<entityID>`)
//! - Enqueue of an id that is pending, scheduled, in flight or recently
//!   completed collapses to `EnqueueOutcome::Duplicate`
//! - Delayed jobs (`process_at`), worker retries and a dead set
//! - In-memory and Redis backends

pub mod job;
pub mod memory;
pub mod priority;
pub mod redis_queue;

use std::time::Duration;

use async_trait::async_trait;
use hr_common::QueueName;
use thiserror::Error;

pub use job::{delivery_job_id, job_id, DeadJob, EnqueueOutcome, Job, QueueStats};
pub use memory::MemoryTaskQueue;
pub use priority::WeightedQueues;
pub use redis_queue::RedisTaskQueue;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Job not in flight: {0}")]
    NotInFlight(String),

    #[error("Queue error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// Queue backend shared by producers (API, ingestion, processors) and the worker pool
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Identifier for logs
    fn identifier(&self) -> &str;

    /// Enqueue unless a job with the same id is known within the dedup window
    async fn enqueue(&self, job: Job) -> Result<EnqueueOutcome>;

    /// Take the next ready job from `queue` and mark it in flight
    async fn dequeue(&self, queue: QueueName) -> Result<Option<Job>>;

    /// Job finished; its id stays deduplicated for the retention window
    async fn complete(&self, job: &Job) -> Result<()>;

    /// Put an in-flight job back, ready after `delay`
    async fn retry(&self, job: Job, delay: Duration) -> Result<()>;

    /// Move an in-flight job to the dead set
    async fn kill(&self, job: Job, error: &str) -> Result<()>;

    async fn stats(&self) -> Result<QueueStats>;

    /// Most recent dead jobs first
    async fn dead_jobs(&self, limit: usize) -> Result<Vec<DeadJob>>;
}
