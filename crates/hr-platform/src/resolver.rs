//! Subscription Resolver
//!
//! Chooses the (endpoint, subscription) pairs an event is delivered to.
//! `single`, `dynamic` and `fanout` read the durable store; `broadcast` reads
//! only the in-memory snapshot.

use std::sync::Arc;

use hr_common::DispatchMode;
use tracing::debug;

use crate::domain::{Endpoint, Event, Subscription};
use crate::error::{PlatformError, Result};
use crate::filter::{matches, matches_headers, type_matches};
use crate::repository::Repositories;
use crate::snapshot::{SnapshotEntry, SubscriptionSnapshot};

#[derive(Debug, Clone)]
pub struct Recipient {
    pub endpoint: Endpoint,
    pub subscription: Subscription,
}

/// Event-type match first, then body filter, then header filter
pub fn subscription_accepts(subscription: &Subscription, event: &Event) -> bool {
    type_matches(&subscription.filter.event_types, &event.event_type)
        && matches(&subscription.filter.body, &event.data)
        && matches_headers(&subscription.filter.headers, &event.headers)
}

fn entry_accepts(entry: &SnapshotEntry, event: &Event) -> bool {
    if let Some(source) = &entry.subscription.source_id {
        if event.source_id.as_deref() != Some(source.as_str()) {
            return false;
        }
    }
    if !type_matches(&entry.subscription.filter.event_types, &event.event_type) {
        return false;
    }
    let (Some(body), Some(headers)) = (&entry.body_filter, &entry.header_filter) else {
        return false;
    };
    body.matches(&event.data) && headers.matches_headers(&event.headers)
}

pub struct SubscriptionResolver {
    repos: Repositories,
    snapshot: Arc<SubscriptionSnapshot>,
}

impl SubscriptionResolver {
    pub fn new(repos: Repositories, snapshot: Arc<SubscriptionSnapshot>) -> Self {
        Self { repos, snapshot }
    }

    pub async fn resolve(&self, event: &Event) -> Result<Vec<Recipient>> {
        let recipients = match event.mode {
            DispatchMode::Single | DispatchMode::Dynamic => {
                let mut out = Vec::new();
                for endpoint_id in &event.endpoints {
                    if let Some(r) = self.resolve_endpoint(event, endpoint_id).await? {
                        out.push(r);
                    }
                }
                out
            }
            DispatchMode::Fanout => {
                let owner_id = event
                    .owner_id
                    .as_deref()
                    .filter(|o| !o.is_empty())
                    .ok_or_else(|| PlatformError::validation("fanout event requires an owner id"))?;
                self.resolve_fanout(event, owner_id).await?
            }
            DispatchMode::Broadcast => self.resolve_broadcast(event),
            DispatchMode::Replay => {
                return Err(PlatformError::validation("replay is not a stored event mode"));
            }
        };

        debug!(
            event_id = %event.id,
            mode = %event.mode,
            recipients = recipients.len(),
            "Resolved recipients"
        );
        Ok(recipients)
    }

    /// At most one recipient: the endpoint's first accepting subscription
    pub async fn resolve_endpoint(&self, event: &Event, endpoint_id: &str) -> Result<Option<Recipient>> {
        let Some(endpoint) = self.repos.endpoints.find_endpoint(&event.project_id, endpoint_id).await? else {
            debug!(event_id = %event.id, endpoint_id = %endpoint_id, "Endpoint not found");
            return Ok(None);
        };
        self.first_accepting(event, endpoint).await
    }

    pub async fn resolve_fanout(&self, event: &Event, owner_id: &str) -> Result<Vec<Recipient>> {
        let endpoints = self.repos.endpoints.find_endpoints_by_owner(&event.project_id, owner_id).await?;
        let mut out = Vec::new();
        for endpoint in endpoints {
            if let Some(r) = self.first_accepting(event, endpoint).await? {
                out.push(r);
            }
        }
        Ok(out)
    }

    /// Project-wide scan of the snapshot, independent of ownership
    pub fn resolve_broadcast(&self, event: &Event) -> Vec<Recipient> {
        let table = self.snapshot.load();
        table
            .entries(&event.project_id)
            .iter()
            .filter(|entry| entry_accepts(entry, event))
            .map(|entry| Recipient {
                endpoint: entry.endpoint.clone(),
                subscription: entry.subscription.clone(),
            })
            .collect()
    }

    async fn first_accepting(&self, event: &Event, endpoint: Endpoint) -> Result<Option<Recipient>> {
        if !endpoint.is_active() {
            debug!(event_id = %event.id, endpoint_id = %endpoint.id, "Endpoint not active");
            return Ok(None);
        }
        let subscriptions = self
            .repos
            .subscriptions
            .find_by_endpoint(&event.project_id, &endpoint.id)
            .await?;
        Ok(subscriptions
            .into_iter()
            .find(|s| subscription_accepts(s, event))
            .map(|subscription| Recipient { endpoint, subscription }))
    }
}
