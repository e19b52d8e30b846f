//! Source runner - N pull workers per broker source
//!
//! Each worker polls a batch, normalizes every message and submits it through
//! the event service. Accepted and duplicate messages are acked. Rejected
//! messages are acked and counted so a poison message is not redelivered
//! forever. Enqueue failures are nacked for redelivery.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hr_config::SourceConfig;
use hr_platform::EventService;
use hr_queue::EnqueueOutcome;
use metrics::counter;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::normalizer::Normalizer;
use crate::sources::build_source;
use crate::transform::MessageTransform;
use crate::{BrokerSource, RawMessage, Rejection, Result};

const IDLE_BACKOFF: Duration = Duration::from_millis(100);
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq)]
pub enum MessageOutcome {
    Accepted,
    /// Same broker message seen before; the create job already exists
    Duplicate,
    Rejected(Rejection),
    /// Left on the broker for redelivery
    Failed,
}

impl MessageOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageOutcome::Accepted => "accepted",
            MessageOutcome::Duplicate => "duplicate",
            MessageOutcome::Rejected(_) => "rejected",
            MessageOutcome::Failed => "failed",
        }
    }
}

pub struct SourceRunner {
    source: Arc<dyn BrokerSource>,
    normalizer: Normalizer,
    service: Arc<EventService>,
    workers: u32,
    batch_size: u32,
    running: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
}

impl SourceRunner {
    pub fn new(source: Arc<dyn BrokerSource>, normalizer: Normalizer, service: Arc<EventService>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            source,
            normalizer,
            service,
            workers: 1,
            batch_size: 10,
            running: AtomicBool::new(false),
            shutdown_tx,
        }
    }

    /// Connect the configured transport and wire its transform
    pub async fn from_config(config: &SourceConfig, service: Arc<EventService>) -> Result<Self> {
        let source = build_source(config).await?;
        let normalizer = Normalizer::new(&config.id, &config.project_id)
            .with_transform(MessageTransform::from_config(&config.transform));
        Ok(Self::new(source, normalizer, service).with_workers(config.workers, config.batch_size))
    }

    pub fn with_workers(mut self, workers: u32, batch_size: u32) -> Self {
        self.workers = workers.max(1);
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn identifier(&self) -> &str {
        self.source.identifier()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!(source = %self.identifier(), "Source runner already started");
            return Vec::new();
        }
        info!(source = %self.identifier(), workers = self.workers, batch_size = self.batch_size, "Starting source runner");

        (0..self.workers)
            .map(|worker| {
                let runner = Arc::clone(self);
                let mut shutdown_rx = self.shutdown_tx.subscribe();
                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            _ = shutdown_rx.recv() => {
                                debug!(source = %runner.identifier(), worker, "Ingest worker stopping");
                                break;
                            }
                            polled = runner.poll_once() => match polled {
                                Ok(0) => tokio::time::sleep(IDLE_BACKOFF).await,
                                Ok(_) => {}
                                Err(e) => {
                                    error!(source = %runner.identifier(), error = %e, "Broker poll failed");
                                    tokio::time::sleep(ERROR_BACKOFF).await;
                                }
                            }
                        }
                    }
                })
            })
            .collect()
    }

    pub fn shutdown(&self) {
        info!(source = %self.identifier(), "Source runner shutting down");
        self.running.store(false, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());
    }

    /// Poll one batch and settle every message in it
    pub async fn poll_once(&self) -> Result<usize> {
        let messages = self.source.poll(self.batch_size).await?;
        for message in &messages {
            self.handle_message(message).await;
        }
        Ok(messages.len())
    }

    pub async fn handle_message(&self, message: &RawMessage) -> MessageOutcome {
        let outcome = match self.normalizer.normalize(message) {
            Err(rejection) => MessageOutcome::Rejected(rejection),
            Ok(req) => match self.service.submit(req).await {
                Ok(accepted) if accepted.outcome == EnqueueOutcome::Duplicate => MessageOutcome::Duplicate,
                Ok(_) => MessageOutcome::Accepted,
                Err(e) if e.is_validation() => MessageOutcome::Rejected(Rejection::Validation(e.to_string())),
                Err(e) => {
                    error!(source = %self.identifier(), message_id = %message.id, error = %e, "Failed to enqueue broker message");
                    MessageOutcome::Failed
                }
            },
        };

        let settled = match &outcome {
            MessageOutcome::Failed => self.source.nack(message).await,
            MessageOutcome::Rejected(rejection) => {
                warn!(source = %self.identifier(), message_id = %message.id, reason = %rejection, "Broker message rejected");
                counter!(
                    "hookrelay_ingest_rejected_total",
                    "source" => self.identifier().to_string(),
                    "reason" => rejection.reason()
                )
                .increment(1);
                self.source.ack(message).await
            }
            MessageOutcome::Accepted | MessageOutcome::Duplicate => self.source.ack(message).await,
        };
        if let Err(e) = settled {
            warn!(source = %self.identifier(), message_id = %message.id, error = %e, "Failed to settle broker message");
        }

        counter!(
            "hookrelay_ingest_messages_total",
            "source" => self.identifier().to_string(),
            "outcome" => outcome.as_str()
        )
        .increment(1);
        outcome
    }
}
