//! In-memory store
//!
//! Implements every repository interface over process-local maps. Used by
//! the standalone server and as the test double for the external store.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{
    AttemptRepository, DeliveryRepository, EndpointRepository, EventRepository, ProjectRepository,
    SubscriptionRepository,
};
use crate::domain::{DeliveryAttempt, Endpoint, Event, EventDelivery, Project, Subscription};
use crate::error::{PlatformError, Result};

#[derive(Default)]
pub struct InMemoryStore {
    projects: RwLock<HashMap<String, Project>>,
    endpoints: RwLock<HashMap<String, Endpoint>>,
    subscriptions: RwLock<HashMap<String, Subscription>>,
    events: RwLock<HashMap<String, Event>>,
    deliveries: RwLock<HashMap<String, EventDelivery>>,
    attempts: RwLock<Vec<DeliveryAttempt>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_project(&self, project: Project) {
        self.projects.write().insert(project.id.clone(), project);
    }

    pub fn insert_endpoint(&self, endpoint: Endpoint) {
        self.endpoints.write().insert(endpoint.id.clone(), endpoint);
    }

    pub fn insert_subscription(&self, subscription: Subscription) {
        self.subscriptions.write().insert(subscription.id.clone(), subscription);
    }

    pub fn event_count(&self, project_id: &str) -> usize {
        self.events.read().values().filter(|e| e.project_id == project_id).count()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.read().len()
    }

    pub fn events(&self, project_id: &str) -> Vec<Event> {
        self.events.read().values().filter(|e| e.project_id == project_id).cloned().collect()
    }
}

#[async_trait]
impl ProjectRepository for InMemoryStore {
    async fn find_project(&self, id: &str) -> Result<Option<Project>> {
        Ok(self.projects.read().get(id).cloned())
    }
}

#[async_trait]
impl EndpointRepository for InMemoryStore {
    async fn find_endpoint(&self, project_id: &str, id: &str) -> Result<Option<Endpoint>> {
        Ok(self.endpoints.read().get(id).filter(|e| e.project_id == project_id).cloned())
    }

    async fn find_endpoints_by_owner(&self, project_id: &str, owner_id: &str) -> Result<Vec<Endpoint>> {
        let mut found: Vec<Endpoint> = self
            .endpoints
            .read()
            .values()
            .filter(|e| e.project_id == project_id && e.owner_id.as_deref() == Some(owner_id))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(found)
    }

    async fn find_endpoint_by_url(&self, project_id: &str, url: &str) -> Result<Option<Endpoint>> {
        Ok(self
            .endpoints
            .read()
            .values()
            .find(|e| e.project_id == project_id && e.url == url)
            .cloned())
    }

    async fn upsert_endpoint(&self, endpoint: &Endpoint) -> Result<()> {
        self.endpoints.write().insert(endpoint.id.clone(), endpoint.clone());
        Ok(())
    }
}

#[async_trait]
impl SubscriptionRepository for InMemoryStore {
    async fn find_by_endpoint(&self, project_id: &str, endpoint_id: &str) -> Result<Vec<Subscription>> {
        let mut found: Vec<Subscription> = self
            .subscriptions
            .read()
            .values()
            .filter(|s| s.project_id == project_id && s.endpoint_id == endpoint_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(found)
    }

    async fn load_subscriptions(&self, project_id: Option<&str>) -> Result<Vec<Subscription>> {
        Ok(self
            .subscriptions
            .read()
            .values()
            .filter(|s| project_id.map(|p| s.project_id == p).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn upsert_subscription(&self, subscription: &Subscription) -> Result<()> {
        self.subscriptions.write().insert(subscription.id.clone(), subscription.clone());
        Ok(())
    }
}

#[async_trait]
impl EventRepository for InMemoryStore {
    async fn create_event(&self, event: &Event) -> Result<()> {
        let mut events = self.events.write();
        if events.contains_key(&event.id) {
            return Err(PlatformError::duplicate("Event", "id", &event.id));
        }
        events.insert(event.id.clone(), event.clone());
        Ok(())
    }

    async fn find_event(&self, project_id: &str, id: &str) -> Result<Option<Event>> {
        Ok(self.events.read().get(id).filter(|e| e.project_id == project_id).cloned())
    }

    async fn idempotency_key_exists(&self, project_id: &str, key: &str, exclude_event_id: &str) -> Result<bool> {
        Ok(self.events.read().values().any(|e| {
            e.project_id == project_id && e.id != exclude_event_id && e.idempotency_key.as_deref() == Some(key)
        }))
    }
}

#[async_trait]
impl DeliveryRepository for InMemoryStore {
    async fn create_deliveries(&self, deliveries: &[EventDelivery]) -> Result<()> {
        let events = self.events.read();
        if let Some(orphan) = deliveries.iter().find(|d| !events.contains_key(&d.event_id)) {
            return Err(PlatformError::not_found("Event", &orphan.event_id));
        }
        drop(events);

        let mut map = self.deliveries.write();
        for delivery in deliveries {
            map.insert(delivery.id.clone(), delivery.clone());
        }
        Ok(())
    }

    async fn find_delivery(&self, project_id: &str, id: &str) -> Result<Option<EventDelivery>> {
        Ok(self.deliveries.read().get(id).filter(|d| d.project_id == project_id).cloned())
    }

    async fn find_by_event(&self, project_id: &str, event_id: &str) -> Result<Vec<EventDelivery>> {
        Ok(self
            .deliveries
            .read()
            .values()
            .filter(|d| d.project_id == project_id && d.event_id == event_id)
            .cloned()
            .collect())
    }

    async fn update_delivery(&self, delivery: &EventDelivery) -> Result<()> {
        let mut map = self.deliveries.write();
        match map.get_mut(&delivery.id) {
            Some(existing) => {
                *existing = delivery.clone();
                Ok(())
            }
            None => Err(PlatformError::not_found("EventDelivery", &delivery.id)),
        }
    }
}

#[async_trait]
impl AttemptRepository for InMemoryStore {
    async fn append_attempt(&self, attempt: &DeliveryAttempt) -> Result<()> {
        if !self.deliveries.read().contains_key(&attempt.delivery_id) {
            return Err(PlatformError::not_found("EventDelivery", &attempt.delivery_id));
        }
        self.attempts.write().push(attempt.clone());
        Ok(())
    }

    async fn find_attempts(&self, delivery_id: &str) -> Result<Vec<DeliveryAttempt>> {
        Ok(self
            .attempts
            .read()
            .iter()
            .filter(|a| a.delivery_id == delivery_id)
            .cloned()
            .collect())
    }
}
