//! HookRelay Router
//!
//! Job execution side of the dispatch engine:
//! - WorkerPool: polls the weighted queues, bounded by a semaphore and an optional rate limit
//! - Processors: create-event fan-out, replay, and per-delivery HTTP dispatch
//! - CircuitBreakerRegistry: per-endpoint breakers that defer deliveries to failing receivers
//! - Lifecycle: periodic snapshot refresh and queue gauges

pub mod circuit_breaker;
pub mod error;
pub mod handler;
pub mod lifecycle;
pub mod pool;
pub mod processors;

pub use circuit_breaker::{
    Admission, BreakerPermit, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitBreakerState, CircuitBreakerStats,
};
pub use error::RouterError;
pub use handler::{HandlerOutcome, JobHandler};
pub use lifecycle::{LifecycleConfig, LifecycleManager};
pub use pool::{JobOutcome, PoolStats, WorkerPool, WorkerPoolConfig};
pub use processors::{
    register_processors, CreateEventProcessor, DeliveryProcessor, ProcessorContext, ReplayEventProcessor,
};

pub type Result<T> = std::result::Result<T, RouterError>;
