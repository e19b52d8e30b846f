//! Per-endpoint circuit breakers
//!
//! Closed -> Open after `failure_threshold` consecutive failed attempts;
//! Open -> HalfOpen once `recovery_timeout` has elapsed, admitting a single
//! trial request; HalfOpen -> Closed on success, back to Open on failure.
//!
//! A trial that is neither settled nor released within `recovery_timeout` is
//! abandoned and the next caller becomes the trial.
//!
//! An open breaker defers deliveries; it never disables the endpoint.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CircuitBreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitBreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Open => write!(f, "Open"),
            Self::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub enabled: bool,
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 10,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

/// Whether a delivery to the endpoint may proceed now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allow,
    /// Half-open: this caller is the single trial request
    Trial,
    /// Breaker open; try again after the delay
    Reject { retry_after: Duration },
}

#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStats {
    pub endpoint_id: String,
    pub state: CircuitBreakerState,
    pub consecutive_failures: u32,
}

#[derive(Debug)]
struct Breaker {
    state: CircuitBreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_started: Option<Instant>,
}

impl Default for Breaker {
    fn default() -> Self {
        Self {
            state: CircuitBreakerState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            trial_started: None,
        }
    }
}

impl Breaker {
    fn open(&mut self, now: Instant) {
        self.state = CircuitBreakerState::Open;
        self.opened_at = Some(now);
        self.trial_started = None;
    }

    fn close(&mut self) {
        self.state = CircuitBreakerState::Closed;
        self.consecutive_failures = 0;
        self.opened_at = None;
        self.trial_started = None;
    }
}

pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: DashMap<String, Breaker>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self { config, breakers: DashMap::new() }
    }

    pub fn disabled() -> Self {
        Self::new(CircuitBreakerConfig { enabled: false, ..Default::default() })
    }

    pub fn check(&self, endpoint_id: &str) -> Admission {
        self.check_at(endpoint_id, Instant::now())
    }

    pub fn check_at(&self, endpoint_id: &str, now: Instant) -> Admission {
        if !self.config.enabled {
            return Admission::Allow;
        }
        let Some(mut breaker) = self.breakers.get_mut(endpoint_id) else {
            return Admission::Allow;
        };

        match breaker.state {
            CircuitBreakerState::Closed => Admission::Allow,
            CircuitBreakerState::Open => {
                let opened_at = breaker.opened_at.unwrap_or(now);
                let elapsed = now.saturating_duration_since(opened_at);
                if elapsed >= self.config.recovery_timeout {
                    breaker.state = CircuitBreakerState::HalfOpen;
                    breaker.trial_started = Some(now);
                    debug!(endpoint_id = %endpoint_id, "Circuit half-open, admitting trial request");
                    Admission::Trial
                } else {
                    Admission::Reject { retry_after: self.config.recovery_timeout - elapsed }
                }
            }
            CircuitBreakerState::HalfOpen => {
                let running = breaker.trial_started.map(|started| now.saturating_duration_since(started));
                match running {
                    Some(elapsed) if elapsed < self.config.recovery_timeout => {
                        Admission::Reject { retry_after: self.config.recovery_timeout - elapsed }
                    }
                    stale => {
                        if stale.is_some() {
                            warn!(endpoint_id = %endpoint_id, "Circuit trial abandoned, admitting a new one");
                        }
                        breaker.trial_started = Some(now);
                        Admission::Trial
                    }
                }
            }
        }
    }

    /// Admission plus a permit that settles it. `Err` carries the retry delay.
    pub fn acquire<'a>(&'a self, endpoint_id: &'a str) -> Result<BreakerPermit<'a>, Duration> {
        match self.check(endpoint_id) {
            Admission::Reject { retry_after } => Err(retry_after),
            admission => Ok(BreakerPermit {
                registry: self,
                endpoint_id,
                trial: admission == Admission::Trial,
                settled: false,
            }),
        }
    }

    /// Give back a half-open trial that ended without an outcome
    pub fn release_trial(&self, endpoint_id: &str) {
        if let Some(mut breaker) = self.breakers.get_mut(endpoint_id) {
            if breaker.state == CircuitBreakerState::HalfOpen && breaker.trial_started.is_some() {
                debug!(endpoint_id = %endpoint_id, "Circuit trial released without outcome");
                breaker.trial_started = None;
            }
        }
    }

    pub fn record_success(&self, endpoint_id: &str) {
        if !self.config.enabled {
            return;
        }
        if let Some(mut breaker) = self.breakers.get_mut(endpoint_id) {
            if breaker.state == CircuitBreakerState::HalfOpen {
                info!(endpoint_id = %endpoint_id, "Circuit closed after successful trial");
            }
            breaker.close();
        }
    }

    pub fn record_failure(&self, endpoint_id: &str) {
        self.record_failure_at(endpoint_id, Instant::now())
    }

    pub fn record_failure_at(&self, endpoint_id: &str, now: Instant) {
        if !self.config.enabled {
            return;
        }
        let mut breaker = self.breakers.entry(endpoint_id.to_string()).or_default();
        breaker.consecutive_failures = breaker.consecutive_failures.saturating_add(1);

        match breaker.state {
            CircuitBreakerState::Closed => {
                if breaker.consecutive_failures >= self.config.failure_threshold {
                    breaker.open(now);
                    warn!(
                        endpoint_id = %endpoint_id,
                        failures = breaker.consecutive_failures,
                        "Circuit opened"
                    );
                }
            }
            CircuitBreakerState::HalfOpen => {
                breaker.open(now);
                warn!(endpoint_id = %endpoint_id, "Circuit trial failed, reopening");
            }
            CircuitBreakerState::Open => {}
        }
    }

    pub fn state(&self, endpoint_id: &str) -> CircuitBreakerState {
        self.breakers
            .get(endpoint_id)
            .map(|b| b.state)
            .unwrap_or(CircuitBreakerState::Closed)
    }

    pub fn stats(&self) -> Vec<CircuitBreakerStats> {
        self.breakers
            .iter()
            .map(|entry| CircuitBreakerStats {
                endpoint_id: entry.key().clone(),
                state: entry.state,
                consecutive_failures: entry.consecutive_failures,
            })
            .collect()
    }
}

/// An admitted request. Dropping it unsettled releases a half-open trial.
pub struct BreakerPermit<'a> {
    registry: &'a CircuitBreakerRegistry,
    endpoint_id: &'a str,
    trial: bool,
    settled: bool,
}

impl BreakerPermit<'_> {
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) {
        self.settled = true;
        self.registry.record_success(self.endpoint_id);
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.registry.record_failure(self.endpoint_id);
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if self.trial && !self.settled {
            self.registry.release_trial(self.endpoint_id);
        }
    }
}
