use async_trait::async_trait;
use hr_common::{CreateEventRequest, DispatchMode};
use hr_platform::{Endpoint, Event, PlatformError, Repositories, Subscription};
use hr_queue::Job;
use tracing::{debug, info};

use super::{DeliveryPlanner, ProcessorContext};
use crate::handler::{HandlerOutcome, JobHandler};
use crate::Result;

/// Handles the four create-event job types.
///
/// Persists the event (once), resolves recipients for its mode, creates the
/// deliveries and enqueues their first trial.
pub struct CreateEventProcessor {
    repos: Repositories,
    planner: DeliveryPlanner,
}

impl CreateEventProcessor {
    pub fn new(ctx: ProcessorContext) -> Self {
        Self {
            planner: DeliveryPlanner::new(&ctx),
            repos: ctx.repos,
        }
    }

    async fn store_event(&self, req: &CreateEventRequest) -> Result<Event> {
        let mut event = Event::from_request(req);

        if req.mode == DispatchMode::Dynamic {
            let endpoint_id = self.upsert_dynamic_target(req).await?;
            event.endpoints = vec![endpoint_id];
        }

        if let Some(key) = event.idempotency_key.as_deref().filter(|k| !k.is_empty()) {
            if self.repos.events.idempotency_key_exists(&event.project_id, key, &event.id).await? {
                event.is_duplicate = true;
            }
        }

        self.repos.events.create_event(&event).await?;
        Ok(event)
    }

    /// Find or create the endpoint for the inline URL and make sure it has a subscription
    async fn upsert_dynamic_target(&self, req: &CreateEventRequest) -> Result<String> {
        let target = req
            .dynamic
            .as_ref()
            .ok_or_else(|| PlatformError::validation("dynamic event without an endpoint url"))?;

        let mut endpoint = match self.repos.endpoints.find_endpoint_by_url(&req.project_id, &target.url).await? {
            Some(existing) => existing,
            None => Endpoint::new(&req.project_id, &target.url, &target.url),
        };
        if let Some(secret) = target.secret.as_deref().filter(|s| !s.is_empty()) {
            if !endpoint.secrets.iter().any(|s| s.value == secret) {
                endpoint = endpoint.with_secret(secret);
            }
        }
        endpoint.updated_at = chrono::Utc::now();
        self.repos.endpoints.upsert_endpoint(&endpoint).await?;

        let subscriptions = self.repos.subscriptions.find_by_endpoint(&req.project_id, &endpoint.id).await?;
        match subscriptions.into_iter().next() {
            None => {
                let mut subscription = Subscription::new(&req.project_id, &endpoint.id, format!("{}-subscription", endpoint.id));
                if !target.event_types.is_empty() {
                    subscription = subscription.with_event_types(target.event_types.iter().cloned());
                }
                self.repos.subscriptions.upsert_subscription(&subscription).await?;
            }
            Some(mut subscription) if !target.event_types.is_empty() && subscription.filter.event_types != target.event_types => {
                subscription.filter.event_types = target.event_types.clone();
                subscription.updated_at = chrono::Utc::now();
                self.repos.subscriptions.upsert_subscription(&subscription).await?;
            }
            Some(_) => {}
        }

        debug!(project_id = %req.project_id, endpoint_id = %endpoint.id, url = %target.url, "Dynamic endpoint upserted");
        Ok(endpoint.id)
    }
}

#[async_trait]
impl JobHandler for CreateEventProcessor {
    async fn handle(&self, job: &Job) -> Result<HandlerOutcome> {
        let req: CreateEventRequest = serde_json::from_value(job.payload.clone())?;

        let (event, resume) = match self.repos.events.find_event(&req.project_id, &req.event_id).await? {
            Some(existing) => {
                debug!(event_id = %existing.id, "Event already stored, resuming");
                (existing, true)
            }
            None => (self.store_event(&req).await?, false),
        };

        if event.is_duplicate {
            info!(
                project_id = %event.project_id,
                event_id = %event.id,
                idempotency_key = ?event.idempotency_key,
                "Duplicate event stored without deliveries"
            );
            return Ok(HandlerOutcome::Done);
        }

        let deliveries = self.planner.plan(&event, resume).await?;
        let enqueued = self.planner.enqueue(&deliveries).await?;

        info!(
            project_id = %event.project_id,
            event_id = %event.id,
            mode = %event.mode,
            deliveries = deliveries.len(),
            enqueued = enqueued,
            "Event processed"
        );
        Ok(HandlerOutcome::Done)
    }
}
