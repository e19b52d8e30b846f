//! Feature Flags
//!
//! Tenant-scoped capability checks behind a swappable evaluator.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use tracing::warn;

/// Gates OAuth2 token exchange for endpoint authentication
pub const OAUTH_TOKEN_EXCHANGE: &str = "oauth-token-exchange";

const ALL_TENANTS: &str = "*";

#[derive(Debug, Clone, Default)]
pub struct FlagContext {
    pub organisation_id: String,
    pub project_id: Option<String>,
}

impl FlagContext {
    pub fn organisation(organisation_id: impl Into<String>) -> Self {
        Self { organisation_id: organisation_id.into(), project_id: None }
    }
}

#[async_trait]
pub trait FlagEvaluator: Send + Sync {
    async fn is_enabled(&self, flag: &str, ctx: &FlagContext) -> bool;
}

/// Flags from configuration: flag key to the organisations it is enabled
/// for, `"*"` meaning everyone.
#[derive(Debug, Clone, Default)]
pub struct StaticFlags {
    enabled: HashMap<String, HashSet<String>>,
}

impl StaticFlags {
    pub fn new(enabled: HashMap<String, Vec<String>>) -> Self {
        Self {
            enabled: enabled.into_iter().map(|(k, v)| (k, v.into_iter().collect())).collect(),
        }
    }

    pub fn enable_globally(mut self, flag: impl Into<String>) -> Self {
        self.enabled.entry(flag.into()).or_default().insert(ALL_TENANTS.to_string());
        self
    }

    pub fn check(&self, flag: &str, ctx: &FlagContext) -> bool {
        self.enabled
            .get(flag)
            .map(|orgs| orgs.contains(ALL_TENANTS) || orgs.contains(&ctx.organisation_id))
            .unwrap_or(false)
    }
}

#[async_trait]
impl FlagEvaluator for StaticFlags {
    async fn is_enabled(&self, flag: &str, ctx: &FlagContext) -> bool {
        self.check(flag, ctx)
    }
}

#[derive(Debug, Deserialize)]
struct FlagResponse {
    enabled: bool,
}

/// Flags from a remote flag service, cached per (flag, organisation).
/// Falls back to the static map when the service cannot be reached.
pub struct RemoteFlags {
    client: reqwest::Client,
    base_url: String,
    ttl: Duration,
    cache: DashMap<(String, String), (bool, Instant)>,
    fallback: Arc<StaticFlags>,
}

impl RemoteFlags {
    pub fn new(base_url: impl Into<String>, fallback: StaticFlags) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .unwrap_or_default(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            ttl: Duration::from_secs(30),
            cache: DashMap::new(),
            fallback: Arc::new(fallback),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    async fn fetch(&self, flag: &str, ctx: &FlagContext) -> Result<bool, reqwest::Error> {
        let url = format!("{}/flags/{}", self.base_url, urlencoding::encode(flag));
        let resp: FlagResponse = self
            .client
            .get(&url)
            .query(&[("org", ctx.organisation_id.as_str())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(resp.enabled)
    }
}

#[async_trait]
impl FlagEvaluator for RemoteFlags {
    async fn is_enabled(&self, flag: &str, ctx: &FlagContext) -> bool {
        let key = (flag.to_string(), ctx.organisation_id.clone());
        if let Some(entry) = self.cache.get(&key) {
            let (value, fetched_at) = *entry;
            if fetched_at.elapsed() < self.ttl {
                return value;
            }
        }

        match self.fetch(flag, ctx).await {
            Ok(value) => {
                self.cache.insert(key, (value, Instant::now()));
                value
            }
            Err(e) => {
                warn!(flag = %flag, organisation_id = %ctx.organisation_id, error = %e, "Flag service unavailable, using static flags");
                self.fallback.check(flag, ctx)
            }
        }
    }
}
