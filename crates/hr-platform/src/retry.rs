//! Retry/Backoff Policy
//!
//! Each delivery carries its own strategy, trial counter, base interval and
//! limit. The limit is the total number of attempts.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::domain::{DeliveryMetadata, Project, RetryConfig, RetryStrategy, Subscription};

/// Outcome of applying one attempt result to a delivery's retry state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptVerdict {
    /// Attempt succeeded; no further trials
    Delivered,
    /// Attempt failed; try again at `next_send_time`
    Retry { next_send_time: DateTime<Utc>, delay: Duration },
    /// Attempt failed and the limit is reached
    Exhausted,
}

/// Wait before the next attempt, given the trial count after the failed attempt
pub fn backoff_delay(strategy: RetryStrategy, interval_seconds: u64, trials: u32, max_backoff_seconds: u64) -> Duration {
    let secs = match strategy {
        RetryStrategy::Linear => interval_seconds,
        RetryStrategy::Exponential => {
            let exponent = trials.saturating_sub(1).min(32);
            interval_seconds.saturating_mul(1u64 << exponent)
        }
    };
    Duration::from_secs(secs.min(max_backoff_seconds))
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    defaults: RetryConfig,
    max_backoff_seconds: u64,
}

impl RetryPolicy {
    pub fn new(defaults: RetryConfig, max_backoff_seconds: u64) -> Self {
        Self { defaults, max_backoff_seconds }
    }

    /// Subscription override, else project override, else global default
    pub fn config_for(&self, project: Option<&Project>, subscription: &Subscription) -> RetryConfig {
        subscription
            .retry
            .or_else(|| project.and_then(|p| p.config.retry))
            .unwrap_or(self.defaults)
    }

    /// Count the attempt and compute what happens next
    pub fn apply(&self, metadata: &mut DeliveryMetadata, success: bool, now: DateTime<Utc>) -> AttemptVerdict {
        metadata.num_trials = metadata.num_trials.saturating_add(1);

        if success {
            return AttemptVerdict::Delivered;
        }
        if metadata.num_trials >= metadata.retry_limit {
            return AttemptVerdict::Exhausted;
        }

        let delay = backoff_delay(
            metadata.strategy,
            metadata.interval_seconds,
            metadata.num_trials,
            self.max_backoff_seconds,
        );
        let next_send_time = now + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        metadata.next_send_time = next_send_time;
        AttemptVerdict::Retry { next_send_time, delay }
    }
}
