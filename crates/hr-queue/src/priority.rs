//! Weighted queue selection
//!
//! Each poll visits every queue once, in an order drawn at random with
//! probability proportional to weight. High-weight queues are usually tried
//! first; low-weight queues are never starved.

use hr_common::QueueName;
use rand::Rng;

#[derive(Debug, Clone)]
pub struct WeightedQueues {
    entries: Vec<(QueueName, u32)>,
}

impl WeightedQueues {
    /// Queues with zero weight are never polled
    pub fn new(weights: impl IntoIterator<Item = (QueueName, u32)>) -> Self {
        let entries = weights.into_iter().filter(|(_, w)| *w > 0).collect();
        Self { entries }
    }

    pub fn defaults() -> Self {
        Self::new(QueueName::ALL.iter().map(|q| (*q, q.default_weight())))
    }

    pub fn queues(&self) -> impl Iterator<Item = QueueName> + '_ {
        self.entries.iter().map(|(q, _)| *q)
    }

    pub fn poll_order(&self) -> Vec<QueueName> {
        self.poll_order_with(&mut rand::thread_rng())
    }

    pub fn poll_order_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<QueueName> {
        let mut remaining = self.entries.clone();
        let mut order = Vec::with_capacity(remaining.len());

        while !remaining.is_empty() {
            let total: u32 = remaining.iter().map(|(_, w)| *w).sum();
            let mut pick = rng.gen_range(0..total);
            let idx = remaining
                .iter()
                .position(|(_, w)| {
                    if pick < *w {
                        true
                    } else {
                        pick -= *w;
                        false
                    }
                })
                .unwrap_or(remaining.len() - 1);
            order.push(remaining.remove(idx).0);
        }
        order
    }
}

impl Default for WeightedQueues {
    fn default() -> Self {
        Self::defaults()
    }
}
