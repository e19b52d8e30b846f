//! Repository Layer
//!
//! Persistence interfaces consumed from the external store. The durable
//! store is the system of record; the core holds no locks over it.

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{DeliveryAttempt, Endpoint, Event, EventDelivery, Project, Subscription};
use crate::error::Result;

pub use memory::InMemoryStore;

#[async_trait]
pub trait ProjectRepository: Send + Sync {
    async fn find_project(&self, id: &str) -> Result<Option<Project>>;
}

#[async_trait]
pub trait EndpointRepository: Send + Sync {
    async fn find_endpoint(&self, project_id: &str, id: &str) -> Result<Option<Endpoint>>;
    async fn find_endpoints_by_owner(&self, project_id: &str, owner_id: &str) -> Result<Vec<Endpoint>>;
    async fn find_endpoint_by_url(&self, project_id: &str, url: &str) -> Result<Option<Endpoint>>;
    async fn upsert_endpoint(&self, endpoint: &Endpoint) -> Result<()>;
}

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    async fn find_by_endpoint(&self, project_id: &str, endpoint_id: &str) -> Result<Vec<Subscription>>;
    /// All subscriptions, optionally limited to one project
    async fn load_subscriptions(&self, project_id: Option<&str>) -> Result<Vec<Subscription>>;
    async fn upsert_subscription(&self, subscription: &Subscription) -> Result<()>;
}

#[async_trait]
pub trait EventRepository: Send + Sync {
    async fn create_event(&self, event: &Event) -> Result<()>;
    async fn find_event(&self, project_id: &str, id: &str) -> Result<Option<Event>>;
    /// True if another event in the project already carries this key
    async fn idempotency_key_exists(&self, project_id: &str, key: &str, exclude_event_id: &str) -> Result<bool>;
}

#[async_trait]
pub trait DeliveryRepository: Send + Sync {
    async fn create_deliveries(&self, deliveries: &[EventDelivery]) -> Result<()>;
    async fn find_delivery(&self, project_id: &str, id: &str) -> Result<Option<EventDelivery>>;
    async fn find_by_event(&self, project_id: &str, event_id: &str) -> Result<Vec<EventDelivery>>;
    async fn update_delivery(&self, delivery: &EventDelivery) -> Result<()>;
}

#[async_trait]
pub trait AttemptRepository: Send + Sync {
    async fn append_attempt(&self, attempt: &DeliveryAttempt) -> Result<()>;
    async fn find_attempts(&self, delivery_id: &str) -> Result<Vec<DeliveryAttempt>>;
}

/// Handles to every persistence interface the core consumes
#[derive(Clone)]
pub struct Repositories {
    pub projects: Arc<dyn ProjectRepository>,
    pub endpoints: Arc<dyn EndpointRepository>,
    pub subscriptions: Arc<dyn SubscriptionRepository>,
    pub events: Arc<dyn EventRepository>,
    pub deliveries: Arc<dyn DeliveryRepository>,
    pub attempts: Arc<dyn AttemptRepository>,
}

impl Repositories {
    /// Use one store for every interface
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: ProjectRepository
            + EndpointRepository
            + SubscriptionRepository
            + EventRepository
            + DeliveryRepository
            + AttemptRepository
            + 'static,
    {
        Self {
            projects: store.clone(),
            endpoints: store.clone(),
            subscriptions: store.clone(),
            events: store.clone(),
            deliveries: store.clone(),
            attempts: store,
        }
    }

    pub fn in_memory() -> (Self, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        (Self::from_store(store.clone()), store)
    }
}
