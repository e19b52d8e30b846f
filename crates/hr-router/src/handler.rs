use std::time::Duration;

use async_trait::async_trait;
use hr_queue::Job;

use crate::Result;

/// What the pool does with a job after its handler returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Finished; mark complete
    Done,
    /// Not attempted yet; run again after the delay without counting a failure
    Reschedule(Duration),
}

/// Processor for one job type
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> Result<HandlerOutcome>;
}
