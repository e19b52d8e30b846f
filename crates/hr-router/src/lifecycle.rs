//! Lifecycle Manager - background tasks for the router
//!
//! Handles:
//! - Periodic refresh of the broadcast subscription snapshot
//! - Queue depth gauges and a periodic stats log line
//! - Graceful shutdown coordination

use std::sync::Arc;
use std::time::Duration;

use hr_platform::SubscriptionSnapshot;
use hr_queue::TaskQueue;
use metrics::gauge;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Zero disables periodic refresh; the snapshot then changes only on explicit sync
    pub snapshot_refresh_interval: Duration,
    pub queue_stats_interval: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            snapshot_refresh_interval: Duration::from_secs(60),
            queue_stats_interval: Duration::from_secs(30),
        }
    }
}

pub struct LifecycleManager {
    shutdown_tx: broadcast::Sender<()>,
}

impl LifecycleManager {
    /// Start all lifecycle tasks
    pub fn start(snapshot: Arc<SubscriptionSnapshot>, queue: Arc<dyn TaskQueue>, config: LifecycleConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        // Snapshot refresher
        if !config.snapshot_refresh_interval.is_zero() {
            let mut shutdown_rx = shutdown_tx.subscribe();
            let interval = config.snapshot_refresh_interval;

            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);

                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            match snapshot.sync().await {
                                Ok(version) => {
                                    let table = snapshot.load();
                                    debug!(
                                        version,
                                        projects = table.project_count(),
                                        subscriptions = table.subscription_count(),
                                        "Subscription snapshot refreshed"
                                    );
                                }
                                Err(e) => error!(error = %e, "Subscription snapshot refresh failed"),
                            }
                        }
                        _ = shutdown_rx.recv() => {
                            info!("Snapshot refresher shutting down");
                            break;
                        }
                    }
                }
            });
        }

        // Queue stats reporter
        {
            let mut shutdown_rx = shutdown_tx.subscribe();
            let interval = config.queue_stats_interval;

            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);

                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            match queue.stats().await {
                                Ok(stats) => {
                                    for (name, pending) in &stats.pending {
                                        gauge!("hookrelay_queue_pending", "queue" => name.clone()).set(*pending as f64);
                                    }
                                    gauge!("hookrelay_queue_scheduled").set(stats.scheduled as f64);
                                    gauge!("hookrelay_queue_in_flight").set(stats.in_flight as f64);
                                    gauge!("hookrelay_queue_dead").set(stats.dead as f64);
                                    info!(
                                        queue = %queue.identifier(),
                                        scheduled = stats.scheduled,
                                        in_flight = stats.in_flight,
                                        dead = stats.dead,
                                        "Queue stats"
                                    );
                                }
                                Err(e) => error!(error = %e, "Failed to read queue stats"),
                            }
                        }
                        _ = shutdown_rx.recv() => {
                            info!("Queue stats reporter shutting down");
                            break;
                        }
                    }
                }
            });
        }

        info!("Lifecycle manager started");
        Self { shutdown_tx }
    }

    pub fn shutdown(&self) {
        info!("Lifecycle manager shutting down");
        let _ = self.shutdown_tx.send(());
    }
}
