//! Attempt Recorder
//!
//! Persists attempt outcomes: one immutable attempt row per HTTP try, then
//! the delivery's status and retry metadata.

use chrono::Utc;
use tracing::{debug, info};

use crate::domain::{DeliveryAttempt, DeliveryStatus, EventDelivery};
use crate::error::Result;
use crate::repository::Repositories;
use crate::retry::AttemptVerdict;

pub struct AttemptRecorder {
    repos: Repositories,
}

impl AttemptRecorder {
    pub fn new(repos: Repositories) -> Self {
        Self { repos }
    }

    pub async fn mark_processing(&self, delivery: &mut EventDelivery) -> Result<()> {
        self.transition(delivery, DeliveryStatus::Processing, None).await
    }

    /// Append the attempt, then move the delivery according to `verdict`
    pub async fn record(
        &self,
        delivery: &mut EventDelivery,
        attempt: &DeliveryAttempt,
        verdict: AttemptVerdict,
    ) -> Result<()> {
        self.repos.attempts.append_attempt(attempt).await?;

        let description = match (&attempt.error, attempt.response_status) {
            (Some(err), _) => Some(err.clone()),
            (None, Some(status)) if !attempt.success => Some(format!("endpoint responded with status {}", status)),
            _ => None,
        };
        let status = match verdict {
            AttemptVerdict::Delivered => DeliveryStatus::Success,
            AttemptVerdict::Retry { .. } => DeliveryStatus::Scheduled,
            AttemptVerdict::Exhausted => DeliveryStatus::Failed,
        };

        debug!(
            delivery_id = %delivery.id,
            attempt_id = %attempt.id,
            trials = delivery.metadata.num_trials,
            status = %status,
            "Recorded delivery attempt"
        );
        self.transition(delivery, status, description).await
    }

    /// Finalize without an attempt, e.g. the endpoint was removed or disabled
    pub async fn discard(&self, delivery: &mut EventDelivery, reason: impl Into<String>) -> Result<()> {
        let reason = reason.into();
        info!(delivery_id = %delivery.id, reason = %reason, "Discarding delivery");
        self.transition(delivery, DeliveryStatus::Discarded, Some(reason)).await
    }

    /// Finalize without an attempt after a non-retryable configuration error
    pub async fn fail(&self, delivery: &mut EventDelivery, reason: impl Into<String>) -> Result<()> {
        self.transition(delivery, DeliveryStatus::Failed, Some(reason.into())).await
    }

    async fn transition(
        &self,
        delivery: &mut EventDelivery,
        status: DeliveryStatus,
        description: Option<String>,
    ) -> Result<()> {
        delivery.status = status;
        if description.is_some() {
            delivery.description = description;
        }
        delivery.updated_at = Utc::now();
        self.repos.deliveries.update_delivery(delivery).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Event, RetryConfig, RetryStrategy};
    use crate::repository::{AttemptRepository, DeliveryRepository, EventRepository};
    use hr_common::{CreateEventRequest, DispatchMode};

    async fn seeded() -> (AttemptRecorder, std::sync::Arc<crate::repository::InMemoryStore>, EventDelivery) {
        let (repos, store) = Repositories::in_memory();
        let event = Event::from_request(&CreateEventRequest {
            event_id: "ev1".into(),
            project_id: "p1".into(),
            mode: DispatchMode::Single,
            event_type: "a.b".into(),
            data: serde_json::json!({}),
            endpoint_id: Some("e1".into()),
            owner_id: None,
            source_id: None,
            idempotency_key: None,
            custom_headers: Default::default(),
            dynamic: None,
            accepted_at: Utc::now(),
        });
        store.create_event(&event).await.unwrap();
        let delivery = EventDelivery::new(
            "p1",
            "ev1",
            "e1",
            "s1",
            "a.b",
            RetryConfig { strategy: RetryStrategy::Linear, interval_seconds: 1, retry_limit: 2 },
        );
        store.create_deliveries(std::slice::from_ref(&delivery)).await.unwrap();
        (AttemptRecorder::new(repos), store, delivery)
    }

    #[tokio::test]
    async fn test_record_appends_attempt_and_updates_status() {
        let (recorder, store, mut delivery) = seeded().await;
        let mut attempt = DeliveryAttempt::new(&delivery, "https://a", "POST");
        attempt.response_status = Some(500);

        recorder.record(&mut delivery, &attempt, AttemptVerdict::Exhausted).await.unwrap();

        let stored = store.find_delivery("p1", &delivery.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DeliveryStatus::Failed);
        assert_eq!(stored.description.as_deref(), Some("endpoint responded with status 500"));
        assert_eq!(store.find_attempts(&delivery.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_discard_writes_no_attempt() {
        let (recorder, store, mut delivery) = seeded().await;
        recorder.discard(&mut delivery, "endpoint inactive").await.unwrap();

        let stored = store.find_delivery("p1", &delivery.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DeliveryStatus::Discarded);
        assert_eq!(store.attempt_count(), 0);
    }
}
