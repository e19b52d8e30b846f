//! WorkerPool - weighted queue consumer with concurrency and rate control
//!
//! - Polls the named queues in weighted random order
//! - Semaphore-bounded concurrency, one permit per running job
//! - Optional pool-wide rate limit using governor
//! - Failed jobs back off exponentially until `max_retry`, then go to the dead set

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use governor::{clock::DefaultClock, state::{InMemoryState, NotKeyed}, Quota, RateLimiter};
use hr_common::ProcessorType;
use hr_queue::{Job, TaskQueue, WeightedQueues};
use metrics::counter;
use serde::Serialize;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::handler::{HandlerOutcome, JobHandler};
use crate::Result;

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub concurrency: u32,
    /// Sleep between polls when every queue is empty
    pub poll_interval: Duration,
    pub rate_limit_per_minute: Option<u32>,
    pub retry_base: Duration,
    pub retry_max: Duration,
    pub drain_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            concurrency: 16,
            poll_interval: Duration::from_millis(200),
            rate_limit_per_minute: None,
            retry_base: Duration::from_secs(1),
            retry_max: Duration::from_secs(60),
            drain_timeout: Duration::from_secs(30),
        }
    }
}

/// What happened to a job after one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    /// Deferred by the handler without counting a failure
    Rescheduled,
    /// Failed and scheduled for another run
    Retried,
    /// Moved to the dead set
    Killed,
}

impl JobOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobOutcome::Completed => "completed",
            JobOutcome::Rescheduled => "rescheduled",
            JobOutcome::Retried => "retried",
            JobOutcome::Killed => "killed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub running: bool,
    pub concurrency: u32,
    pub active_workers: u32,
    pub available_permits: usize,
}

pub struct WorkerPool {
    config: WorkerPoolConfig,
    queue: Arc<dyn TaskQueue>,
    weights: WeightedQueues,
    handlers: HashMap<ProcessorType, Arc<dyn JobHandler>>,

    semaphore: Arc<Semaphore>,
    rate_limiter: Option<Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>>,

    running: AtomicBool,
    active_workers: Arc<AtomicU32>,
    shutdown_tx: broadcast::Sender<()>,
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig, queue: Arc<dyn TaskQueue>, weights: WeightedQueues) -> Self {
        let rate_limiter = config.rate_limit_per_minute.and_then(|rpm| {
            NonZeroU32::new(rpm).map(|nz| Arc::new(RateLimiter::direct(Quota::per_minute(nz))))
        });
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            semaphore: Arc::new(Semaphore::new(config.concurrency.max(1) as usize)),
            config,
            queue,
            weights,
            handlers: HashMap::new(),
            rate_limiter,
            running: AtomicBool::new(false),
            active_workers: Arc::new(AtomicU32::new(0)),
            shutdown_tx,
        }
    }

    pub fn register(&mut self, processor: ProcessorType, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(processor, handler);
    }

    pub fn has_handler(&self, processor: ProcessorType) -> bool {
        self.handlers.contains_key(&processor)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            running: self.is_running(),
            concurrency: self.config.concurrency,
            active_workers: self.active_workers.load(Ordering::SeqCst),
            available_permits: self.semaphore.available_permits(),
        }
    }

    /// Start the polling loop. Returns immediately; the loop runs until `shutdown`.
    pub fn start(self: Arc<Self>) -> Option<JoinHandle<()>> {
        if self.running.swap(true, Ordering::SeqCst) {
            return None;
        }

        info!(
            queue = %self.queue.identifier(),
            concurrency = self.config.concurrency,
            rate_limit = ?self.config.rate_limit_per_minute,
            handlers = self.handlers.len(),
            "Starting worker pool"
        );

        let pool = self.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        Some(tokio::spawn(async move {
            loop {
                let permit = tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    permit = pool.semaphore.clone().acquire_owned() => match permit {
                        Ok(p) => p,
                        Err(_) => break,
                    },
                };

                let job = match pool.next_job().await {
                    Ok(Some(job)) => job,
                    Ok(None) => {
                        drop(permit);
                        tokio::select! {
                            _ = shutdown_rx.recv() => break,
                            _ = tokio::time::sleep(pool.config.poll_interval) => continue,
                        }
                    }
                    Err(e) => {
                        drop(permit);
                        error!(error = %e, queue = %pool.queue.identifier(), "Error polling queue");
                        tokio::select! {
                            _ = shutdown_rx.recv() => break,
                            _ = tokio::time::sleep(Duration::from_secs(1)) => continue,
                        }
                    }
                };

                if let Some(ref rl) = pool.rate_limiter {
                    rl.until_ready().await;
                }

                let worker = pool.clone();
                worker.active_workers.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    worker.process_job(job).await;
                    worker.active_workers.fetch_sub(1, Ordering::SeqCst);
                    drop(permit);
                });
            }
            info!("Worker pool polling loop stopped");
        }))
    }

    /// Stop polling and wait for running jobs, up to the drain timeout
    pub async fn shutdown(&self) {
        info!("Worker pool shutting down...");
        self.running.store(false, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());

        let start = Instant::now();
        while self.active_workers.load(Ordering::SeqCst) > 0 && start.elapsed() < self.config.drain_timeout {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let remaining = self.active_workers.load(Ordering::SeqCst);
        if remaining > 0 {
            warn!(remaining = remaining, "Jobs still running at shutdown; a durable queue redelivers them after their visibility timeout");
        }
        info!("Worker pool shutdown complete");
    }

    async fn next_job(&self) -> Result<Option<Job>> {
        for queue in self.weights.poll_order() {
            if let Some(job) = self.queue.dequeue(queue).await? {
                return Ok(Some(job));
            }
        }
        Ok(None)
    }

    /// Run one dequeued job through its handler and settle it with the queue
    pub async fn process_job(&self, mut job: Job) -> JobOutcome {
        let processor = job.processor;
        let outcome = match self.handlers.get(&processor) {
            None => {
                error!(job_id = %job.id, processor = %processor, "No handler registered");
                self.settle_kill(job, &format!("no handler registered for {}", processor)).await
            }
            Some(handler) => match handler.handle(&job).await {
                Ok(HandlerOutcome::Done) => {
                    debug!(job_id = %job.id, processor = %processor, "Job completed");
                    match self.queue.complete(&job).await {
                        Ok(()) => JobOutcome::Completed,
                        Err(e) => {
                            error!(job_id = %job.id, error = %e, "Failed to mark job complete");
                            JobOutcome::Completed
                        }
                    }
                }
                Ok(HandlerOutcome::Reschedule(delay)) => {
                    debug!(job_id = %job.id, delay_ms = delay.as_millis() as u64, "Job rescheduled");
                    self.settle_retry(job, delay, JobOutcome::Rescheduled).await
                }
                Err(e) if !e.is_retryable() => {
                    warn!(job_id = %job.id, processor = %processor, error = %e, "Job failed permanently");
                    self.settle_kill(job, &e.to_string()).await
                }
                Err(e) => {
                    job.retried = job.retried.saturating_add(1);
                    job.last_error = Some(e.to_string());
                    if job.retries_exhausted() {
                        warn!(
                            job_id = %job.id,
                            retried = job.retried,
                            error = %e,
                            "Job retries exhausted"
                        );
                        self.settle_kill(job, &e.to_string()).await
                    } else {
                        let delay = self.job_backoff(job.retried);
                        warn!(
                            job_id = %job.id,
                            retried = job.retried,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Job failed, will retry"
                        );
                        self.settle_retry(job, delay, JobOutcome::Retried).await
                    }
                }
            },
        };

        counter!(
            "hookrelay_jobs_processed_total",
            "processor" => processor.as_str(),
            "outcome" => outcome.as_str()
        )
        .increment(1);
        outcome
    }

    /// `retry_base * 2^(retried-1)`, capped at `retry_max`
    fn job_backoff(&self, retried: u32) -> Duration {
        let exponent = retried.saturating_sub(1).min(16);
        self.config.retry_base.saturating_mul(1u32 << exponent).min(self.config.retry_max)
    }

    async fn settle_retry(&self, job: Job, delay: Duration, outcome: JobOutcome) -> JobOutcome {
        let job_id = job.id.clone();
        match self.queue.retry(job, delay).await {
            Ok(()) => outcome,
            Err(e) => {
                error!(job_id = %job_id, error = %e, "Failed to reschedule job");
                outcome
            }
        }
    }

    async fn settle_kill(&self, job: Job, reason: &str) -> JobOutcome {
        let job_id = job.id.clone();
        if let Err(e) = self.queue.kill(job, reason).await {
            error!(job_id = %job_id, error = %e, "Failed to move job to dead set");
        }
        JobOutcome::Killed
    }
}
