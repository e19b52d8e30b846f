use async_trait::async_trait;
use hr_common::ReplayRequest;
use hr_platform::{PlatformError, Repositories};
use hr_queue::Job;
use tracing::info;

use super::{DeliveryPlanner, ProcessorContext};
use crate::handler::{HandlerOutcome, JobHandler};
use crate::Result;

/// Redelivers a stored event: recipients are resolved again with the event's
/// original mode and each gets a fresh delivery.
pub struct ReplayEventProcessor {
    repos: Repositories,
    planner: DeliveryPlanner,
}

impl ReplayEventProcessor {
    pub fn new(ctx: ProcessorContext) -> Self {
        Self {
            planner: DeliveryPlanner::new(&ctx),
            repos: ctx.repos,
        }
    }
}

#[async_trait]
impl JobHandler for ReplayEventProcessor {
    async fn handle(&self, job: &Job) -> Result<HandlerOutcome> {
        let req: ReplayRequest = serde_json::from_value(job.payload.clone())?;
        let event = self
            .repos
            .events
            .find_event(&req.project_id, &req.event_id)
            .await?
            .ok_or_else(|| PlatformError::not_found("Event", &req.event_id))?;

        let deliveries = self.planner.plan(&event, false).await?;
        let enqueued = self.planner.enqueue(&deliveries).await?;

        info!(
            project_id = %event.project_id,
            event_id = %event.id,
            mode = %event.mode,
            deliveries = deliveries.len(),
            enqueued = enqueued,
            "Event replayed"
        );
        Ok(HandlerOutcome::Done)
    }
}
