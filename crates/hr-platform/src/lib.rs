//! HookRelay Platform
//!
//! Core of the dispatch engine:
//! - Domain models (projects, endpoints, subscriptions, events, deliveries, attempts)
//! - Persistence interfaces consumed from the external store, plus an in-memory store
//! - Filter evaluation and event-type matching
//! - Copy-on-refresh subscription snapshot for broadcast matching
//! - Subscription resolution per dispatch mode
//! - Retry/backoff policy and attempt recording
//! - Tenant-scoped feature flags
//! - Event trigger service (validation gate in front of the task queue)

pub mod domain;
pub mod error;
pub mod filter;
pub mod flags;
pub mod recorder;
pub mod repository;
pub mod resolver;
pub mod retry;
pub mod service;
pub mod snapshot;

pub use domain::*;
pub use error::{PlatformError, Result};
pub use filter::{matches, matches_headers, type_matches, FilterTree};
pub use flags::{FlagContext, FlagEvaluator, RemoteFlags, StaticFlags};
pub use recorder::AttemptRecorder;
pub use repository::{InMemoryStore, Repositories};
pub use resolver::{Recipient, SubscriptionResolver};
pub use retry::{backoff_delay, AttemptVerdict, RetryPolicy};
pub use service::{Accepted, DynamicEventInput, EventService};
pub use snapshot::{SnapshotTable, SubscriptionSnapshot};
