//! Broadcast Subscription Snapshot
//!
//! Immutable, versioned table of (subscription, endpoint) pairs per project.
//! A refresh builds a complete new table off to the side and publishes it with
//! a single pointer swap, so readers never observe a partially-updated table.
//! The snapshot is not kept live; it reflects the store as of the last sync.
//!
//! Refreshes are serialized: each one reads the store and publishes while
//! holding the refresh lock, so a slower refresh never overwrites a newer one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::{Endpoint, Subscription};
use crate::error::Result;
use crate::filter::{lowercase_keys, FilterTree};
use crate::repository::Repositories;

/// A subscription with its endpoint and pre-parsed filters
#[derive(Debug, Clone)]
pub struct SnapshotEntry {
    pub subscription: Subscription,
    pub endpoint: Endpoint,
    pub body_filter: Option<FilterTree>,
    pub header_filter: Option<FilterTree>,
}

impl SnapshotEntry {
    /// Filters that fail to parse are stored as `None` and never match.
    fn new(subscription: Subscription, endpoint: Endpoint) -> Self {
        let body_filter = parse_logged(&subscription, &subscription.filter.body);
        let header_filter = parse_logged(&subscription, &lowercase_keys(&subscription.filter.headers));
        Self { subscription, endpoint, body_filter, header_filter }
    }
}

fn parse_logged(subscription: &Subscription, filter: &serde_json::Value) -> Option<FilterTree> {
    match FilterTree::parse(filter) {
        Ok(tree) => Some(tree),
        Err(e) => {
            warn!(subscription_id = %subscription.id, error = %e, "Invalid subscription filter, subscription will never match");
            None
        }
    }
}

#[derive(Debug, Default)]
pub struct SnapshotTable {
    pub version: u64,
    pub synced_at: Option<DateTime<Utc>>,
    projects: HashMap<String, Arc<Vec<SnapshotEntry>>>,
}

impl SnapshotTable {
    pub fn entries(&self, project_id: &str) -> &[SnapshotEntry] {
        self.projects.get(project_id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn project_count(&self) -> usize {
        self.projects.len()
    }

    pub fn subscription_count(&self) -> usize {
        self.projects.values().map(|v| v.len()).sum()
    }
}

pub struct SubscriptionSnapshot {
    repos: Repositories,
    current: RwLock<Arc<SnapshotTable>>,
    version: AtomicU64,
    refresh: Mutex<()>,
}

impl SubscriptionSnapshot {
    pub fn new(repos: Repositories) -> Self {
        Self {
            repos,
            current: RwLock::new(Arc::new(SnapshotTable::default())),
            version: AtomicU64::new(0),
            refresh: Mutex::new(()),
        }
    }

    /// Current table. Holding the returned `Arc` pins that version.
    pub fn load(&self) -> Arc<SnapshotTable> {
        self.current.read().clone()
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Rebuild the whole table from the store and publish it
    pub async fn sync(&self) -> Result<u64> {
        let _refresh = self.refresh.lock().await;
        let subscriptions = self.repos.subscriptions.load_subscriptions(None).await?;
        let mut grouped: HashMap<String, Vec<SnapshotEntry>> = HashMap::new();
        for (project_id, entry) in self.join_active(subscriptions).await? {
            grouped.entry(project_id).or_default().push(entry);
        }
        let projects = grouped.into_iter().map(|(k, v)| (k, Arc::new(v))).collect();
        let version = self.publish(projects);
        info!(version, "Subscription snapshot synced");
        Ok(version)
    }

    /// Rebuild one project's entries, carrying every other project over unchanged
    pub async fn sync_project(&self, project_id: &str) -> Result<u64> {
        let _refresh = self.refresh.lock().await;
        let subscriptions = self.repos.subscriptions.load_subscriptions(Some(project_id)).await?;
        let entries: Vec<SnapshotEntry> = self
            .join_active(subscriptions)
            .await?
            .into_iter()
            .map(|(_, entry)| entry)
            .collect();
        let count = entries.len();

        let mut projects = self.load().projects.clone();
        if entries.is_empty() {
            projects.remove(project_id);
        } else {
            projects.insert(project_id.to_string(), Arc::new(entries));
        }
        let version = self.publish(projects);
        info!(project_id = %project_id, subscriptions = count, version, "Project subscription snapshot synced");
        Ok(version)
    }

    /// Drop every entry
    pub async fn reset(&self) -> u64 {
        let _refresh = self.refresh.lock().await;
        let version = self.publish(HashMap::new());
        info!(version, "Subscription snapshot reset");
        version
    }

    fn publish(&self, projects: HashMap<String, Arc<Vec<SnapshotEntry>>>) -> u64 {
        let mut guard = self.current.write();
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        *guard = Arc::new(SnapshotTable {
            version,
            synced_at: Some(Utc::now()),
            projects,
        });
        version
    }

    /// Pair subscriptions with their endpoints, dropping inactive or missing endpoints
    async fn join_active(&self, subscriptions: Vec<Subscription>) -> Result<Vec<(String, SnapshotEntry)>> {
        let mut endpoints: HashMap<(String, String), Option<Endpoint>> = HashMap::new();
        let mut out = Vec::with_capacity(subscriptions.len());

        for subscription in subscriptions {
            let key = (subscription.project_id.clone(), subscription.endpoint_id.clone());
            if !endpoints.contains_key(&key) {
                let found = self.repos.endpoints.find_endpoint(&key.0, &key.1).await?;
                endpoints.insert(key.clone(), found);
            }
            match endpoints.get(&key).and_then(|e| e.as_ref()) {
                Some(endpoint) if endpoint.is_active() => {
                    out.push((key.0, SnapshotEntry::new(subscription, endpoint.clone())));
                }
                _ => {
                    debug!(subscription_id = %subscription.id, endpoint_id = %key.1, "Skipping subscription without active endpoint");
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EndpointStatus;
    use crate::repository::SubscriptionRepository;
    use async_trait::async_trait;
    use std::time::Duration;

    /// Full loads read the store, then stall before returning
    struct StallingSubscriptions {
        inner: Arc<dyn SubscriptionRepository>,
        stall: Duration,
    }

    #[async_trait]
    impl SubscriptionRepository for StallingSubscriptions {
        async fn find_by_endpoint(&self, project_id: &str, endpoint_id: &str) -> Result<Vec<Subscription>> {
            self.inner.find_by_endpoint(project_id, endpoint_id).await
        }

        async fn load_subscriptions(&self, project_id: Option<&str>) -> Result<Vec<Subscription>> {
            let loaded = self.inner.load_subscriptions(project_id).await?;
            if project_id.is_none() {
                tokio::time::sleep(self.stall).await;
            }
            Ok(loaded)
        }

        async fn upsert_subscription(&self, subscription: &Subscription) -> Result<()> {
            self.inner.upsert_subscription(subscription).await
        }
    }

    #[tokio::test]
    async fn test_sync_publishes_new_version() {
        let (repos, store) = Repositories::in_memory();
        let ep = Endpoint::new("p1", "a", "https://a");
        store.insert_subscription(Subscription::new("p1", &ep.id, "s1"));
        store.insert_endpoint(ep);

        let snapshot = SubscriptionSnapshot::new(repos);
        assert_eq!(snapshot.load().entries("p1").len(), 0);

        let v = snapshot.sync().await.unwrap();
        assert_eq!(v, 1);
        assert_eq!(snapshot.load().entries("p1").len(), 1);
        assert_eq!(snapshot.load().version, 1);
    }

    #[tokio::test]
    async fn test_readers_keep_their_version_across_refresh() {
        let (repos, store) = Repositories::in_memory();
        let ep = Endpoint::new("p1", "a", "https://a");
        store.insert_subscription(Subscription::new("p1", &ep.id, "s1"));
        store.insert_endpoint(ep.clone());

        let snapshot = SubscriptionSnapshot::new(repos);
        snapshot.sync().await.unwrap();
        let pinned = snapshot.load();

        store.insert_subscription(Subscription::new("p1", &ep.id, "s2"));
        snapshot.sync().await.unwrap();

        assert_eq!(pinned.entries("p1").len(), 1);
        assert_eq!(snapshot.load().entries("p1").len(), 2);
    }

    #[tokio::test]
    async fn test_inactive_endpoints_excluded() {
        let (repos, store) = Repositories::in_memory();
        let ep = Endpoint::new("p1", "a", "https://a").with_status(EndpointStatus::Paused);
        store.insert_subscription(Subscription::new("p1", &ep.id, "s1"));
        store.insert_endpoint(ep);

        let snapshot = SubscriptionSnapshot::new(repos);
        snapshot.sync().await.unwrap();
        assert_eq!(snapshot.load().subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_sync_project_leaves_other_projects() {
        let (repos, store) = Repositories::in_memory();
        for p in ["p1", "p2"] {
            let ep = Endpoint::new(p, "a", "https://a");
            store.insert_subscription(Subscription::new(p, &ep.id, "s"));
            store.insert_endpoint(ep);
        }
        let snapshot = SubscriptionSnapshot::new(repos);
        snapshot.sync().await.unwrap();

        let ep = Endpoint::new("p1", "b", "https://b");
        store.insert_subscription(Subscription::new("p1", &ep.id, "s"));
        store.insert_endpoint(ep);
        snapshot.sync_project("p1").await.unwrap();

        let table = snapshot.load();
        assert_eq!(table.entries("p1").len(), 2);
        assert_eq!(table.entries("p2").len(), 1);

        snapshot.reset().await;
        assert_eq!(snapshot.load().subscription_count(), 0);
        assert_eq!(snapshot.version(), 3);
    }

    #[tokio::test]
    async fn test_slow_full_sync_does_not_overwrite_newer_project_sync() {
        let (mut repos, store) = Repositories::in_memory();
        repos.subscriptions = Arc::new(StallingSubscriptions {
            inner: repos.subscriptions.clone(),
            stall: Duration::from_millis(200),
        });
        let ep = Endpoint::new("p1", "a", "https://a");
        store.insert_subscription(Subscription::new("p1", &ep.id, "s1"));
        store.insert_endpoint(ep);
        let snapshot = Arc::new(SubscriptionSnapshot::new(repos));

        let full = tokio::spawn({
            let snapshot = snapshot.clone();
            async move { snapshot.sync().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Subscription added while the full sync is stalled on its stale read
        let ep = Endpoint::new("p1", "b", "https://b");
        store.insert_subscription(Subscription::new("p1", &ep.id, "s2"));
        store.insert_endpoint(ep);
        snapshot.sync_project("p1").await.unwrap();

        full.await.unwrap().unwrap();
        assert_eq!(snapshot.load().entries("p1").len(), 2);
        assert_eq!(snapshot.version(), 2);
    }
}
