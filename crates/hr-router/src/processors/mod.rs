//! Job processors
//!
//! `create` turns an accepted event into deliveries, `replay` re-resolves a
//! stored event, and `delivery` performs one HTTP attempt per job.

mod create;
mod delivery;
mod replay;

use std::collections::HashSet;
use std::sync::Arc;

use hr_common::{DeliveryRequest, ProcessorType, QueueName};
use hr_dispatch::HttpDispatcher;
use hr_platform::{
    DeliveryStatus, Event, EventDelivery, FlagEvaluator, Project, Recipient, Repositories, RetryPolicy, SubscriptionResolver,
    SubscriptionSnapshot,
};
use hr_queue::{delivery_job_id, EnqueueOutcome, Job, TaskQueue};
use tracing::debug;

use crate::circuit_breaker::CircuitBreakerRegistry;
use crate::pool::WorkerPool;
use crate::Result;

pub use create::CreateEventProcessor;
pub use delivery::DeliveryProcessor;
pub use replay::ReplayEventProcessor;

/// Shared dependencies of every processor
#[derive(Clone)]
pub struct ProcessorContext {
    pub repos: Repositories,
    pub queue: Arc<dyn TaskQueue>,
    pub snapshot: Arc<SubscriptionSnapshot>,
    pub dispatcher: Arc<HttpDispatcher>,
    pub retry: RetryPolicy,
    pub flags: Arc<dyn FlagEvaluator>,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub max_job_retries: u32,
}

/// Register the handler for every processor type
pub fn register_processors(pool: &mut WorkerPool, ctx: ProcessorContext) {
    let create: Arc<CreateEventProcessor> = Arc::new(CreateEventProcessor::new(ctx.clone()));
    for processor in [
        ProcessorType::CreateEvent,
        ProcessorType::CreateFanoutEvent,
        ProcessorType::CreateBroadcastEvent,
        ProcessorType::CreateDynamicEvent,
    ] {
        pool.register(processor, create.clone());
    }
    pool.register(ProcessorType::ReplayEvent, Arc::new(ReplayEventProcessor::new(ctx.clone())));
    pool.register(ProcessorType::EventDelivery, Arc::new(DeliveryProcessor::new(ctx)));
}

/// Creates delivery rows for resolved recipients and enqueues their first trial
pub(crate) struct DeliveryPlanner {
    repos: Repositories,
    queue: Arc<dyn TaskQueue>,
    resolver: SubscriptionResolver,
    retry: RetryPolicy,
    max_job_retries: u32,
}

impl DeliveryPlanner {
    pub(crate) fn new(ctx: &ProcessorContext) -> Self {
        Self {
            repos: ctx.repos.clone(),
            queue: ctx.queue.clone(),
            resolver: SubscriptionResolver::new(ctx.repos.clone(), ctx.snapshot.clone()),
            retry: ctx.retry,
            max_job_retries: ctx.max_job_retries,
        }
    }

    /// Resolve and persist deliveries for `event`; returns those whose first
    /// trial still has to be enqueued.
    ///
    /// With `resume`, endpoints that already hold a delivery for the event
    /// get no new one, and existing deliveries never attempted are returned
    /// again so a re-run job finishes enqueueing them.
    pub(crate) async fn plan(&self, event: &Event, resume: bool) -> Result<Vec<EventDelivery>> {
        let recipients = self.resolver.resolve(event).await?;

        let existing = if resume {
            self.repos.deliveries.find_by_event(&event.project_id, &event.id).await?
        } else {
            Vec::new()
        };
        let covered: HashSet<&str> = existing.iter().map(|d| d.endpoint_id.as_str()).collect();

        let project = self.repos.projects.find_project(&event.project_id).await?;
        let fresh: Vec<EventDelivery> = recipients
            .into_iter()
            .filter(|r| !covered.contains(r.endpoint.id.as_str()))
            .map(|r| self.delivery_for(event, project.as_ref(), r))
            .collect();

        if !fresh.is_empty() {
            self.repos.deliveries.create_deliveries(&fresh).await?;
        }

        let mut pending: Vec<EventDelivery> = existing
            .into_iter()
            .filter(|d| d.status == DeliveryStatus::Scheduled && d.metadata.num_trials == 0)
            .collect();
        pending.extend(fresh);
        Ok(pending)
    }

    fn delivery_for(&self, event: &Event, project: Option<&Project>, recipient: Recipient) -> EventDelivery {
        let retry = self.retry.config_for(project, &recipient.subscription);
        let mut delivery = EventDelivery::new(
            &event.project_id,
            &event.id,
            &recipient.endpoint.id,
            &recipient.subscription.id,
            &event.event_type,
            retry,
        );
        delivery.headers = event.headers.clone();
        delivery.idempotency_key = event.idempotency_key.clone();
        delivery
    }

    /// Enqueue trial 0 of each delivery
    pub(crate) async fn enqueue(&self, deliveries: &[EventDelivery]) -> Result<usize> {
        let mut enqueued = 0;
        for delivery in deliveries {
            let job = delivery_job(delivery, 0, self.max_job_retries)?;
            if self.queue.enqueue(job).await? == EnqueueOutcome::Enqueued {
                enqueued += 1;
            }
        }
        debug!(deliveries = deliveries.len(), enqueued = enqueued, "Delivery jobs enqueued");
        Ok(enqueued)
    }
}

pub(crate) fn delivery_job(delivery: &EventDelivery, trial: u32, max_job_retries: u32) -> Result<Job> {
    let payload = serde_json::to_value(DeliveryRequest {
        project_id: delivery.project_id.clone(),
        delivery_id: delivery.id.clone(),
        trial,
    })?;
    let job = Job::new(
        delivery_job_id(&delivery.project_id, &delivery.id, trial),
        ProcessorType::EventDelivery,
        QueueName::Event,
        delivery.project_id.clone(),
        payload,
    )
    .with_max_retry(max_job_retries);
    Ok(job)
}
