//! Delivery processor
//!
//! One job is one HTTP attempt for one EventDelivery. The attempt is
//! recorded, the retry policy decides the next state, and a failed attempt
//! with trials left enqueues the next trial as a new scheduled job.
//!
//! A job whose trial is no longer the delivery's current one is a redelivery
//! of work already done and is dropped without a request.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use governor::clock::{Clock, DefaultClock};
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use hr_common::DeliveryRequest;
use hr_dispatch::{BodyConverter, DispatchError, HttpDispatcher, OAuth2Request};
use hr_platform::flags::{FlagContext, OAUTH_TOKEN_EXCHANGE};
use hr_platform::{
    AttemptRecorder, AttemptVerdict, DeliveryAttempt, DeliveryStatus, Endpoint, EndpointAuthentication, EventDelivery,
    FlagEvaluator, Project, Repositories, RetryPolicy,
};
use hr_queue::{Job, TaskQueue};
use metrics::counter;
use tracing::{debug, info, warn};

use super::{delivery_job, ProcessorContext};
use crate::circuit_breaker::CircuitBreakerRegistry;
use crate::handler::{HandlerOutcome, JobHandler};
use crate::Result;

type EndpointLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// How long a `Processing` delivery is considered owned by the run that marked it
const PROCESSING_LEASE_SECS: i64 = 300;

pub struct DeliveryProcessor {
    repos: Repositories,
    queue: Arc<dyn TaskQueue>,
    dispatcher: Arc<HttpDispatcher>,
    retry: RetryPolicy,
    recorder: AttemptRecorder,
    flags: Arc<dyn FlagEvaluator>,
    breakers: Arc<CircuitBreakerRegistry>,
    limiters: DashMap<String, (u32, Arc<EndpointLimiter>)>,
    clock: DefaultClock,
    max_job_retries: u32,
}

/// Result of one HTTP try, before the retry policy is applied
struct AttemptResult {
    attempt: DeliveryAttempt,
    success: bool,
}

impl DeliveryProcessor {
    pub fn new(ctx: ProcessorContext) -> Self {
        Self {
            recorder: AttemptRecorder::new(ctx.repos.clone()),
            repos: ctx.repos,
            queue: ctx.queue,
            dispatcher: ctx.dispatcher,
            retry: ctx.retry,
            flags: ctx.flags,
            breakers: ctx.breakers,
            limiters: DashMap::new(),
            clock: DefaultClock::default(),
            max_job_retries: ctx.max_job_retries,
        }
    }

    /// Delay until the endpoint's own rate limit admits another call
    fn rate_limit_wait(&self, endpoint: &Endpoint) -> Option<Duration> {
        let rpm = endpoint.rate_limit_per_minute.and_then(NonZeroU32::new)?;
        let limiter = {
            let mut entry = self
                .limiters
                .entry(endpoint.id.clone())
                .or_insert_with(|| (rpm.get(), Arc::new(RateLimiter::direct(Quota::per_minute(rpm)))));
            if entry.0 != rpm.get() {
                *entry = (rpm.get(), Arc::new(RateLimiter::direct(Quota::per_minute(rpm))));
            }
            entry.1.clone()
        };
        limiter.check().err().map(|not_until| not_until.wait_time_from(self.clock.now()))
    }

    async fn attempt(
        &self,
        delivery: &EventDelivery,
        endpoint: &Endpoint,
        project: Option<&Project>,
        data: &serde_json::Value,
    ) -> std::result::Result<AttemptResult, DispatchError> {
        let converter = BodyConverter::for_content_type(endpoint.content_type);
        let (body, content_type) = converter.convert(data)?;

        let mut req = self.dispatcher.request(&endpoint.url, body, content_type);
        req.signature_value = hr_dispatch::signature_for(endpoint, &req.body, Utc::now())?;
        if let Some(header) = project
            .and_then(|p| p.config.signature_header.as_deref())
            .filter(|h| !h.is_empty())
        {
            req.signature_header = header.to_string();
        }
        if let Some(max) = project.and_then(|p| p.config.max_response_bytes) {
            req.max_response_bytes = max;
        }
        if let Some(secs) = endpoint.http_timeout_secs {
            req.timeout = Duration::from_secs(secs);
        }
        req.headers = endpoint.custom_headers.clone();
        req.headers.extend(delivery.headers.clone());
        req.idempotency_key = delivery.idempotency_key.clone();
        req.client_cert = endpoint.client_certificate.clone();

        let mut attempt = DeliveryAttempt::new(delivery, &endpoint.url, req.method.as_str());
        attempt.user_agent = Some(self.dispatcher.user_agent().to_string());

        match &endpoint.authentication {
            Some(EndpointAuthentication::SharedSecret { header_name, header_value }) => {
                req.headers.insert(header_name.clone(), header_value.clone());
            }
            Some(EndpointAuthentication::OAuth2(config)) => {
                let ctx = FlagContext {
                    organisation_id: project.map(|p| p.organisation_id.clone()).unwrap_or_default(),
                    project_id: Some(delivery.project_id.clone()),
                };
                if !self.flags.is_enabled(OAUTH_TOKEN_EXCHANGE, &ctx).await {
                    attempt.error = Some(format!(
                        "oauth2 authentication requires the {} feature for organisation {}",
                        OAUTH_TOKEN_EXCHANGE, ctx.organisation_id
                    ));
                    return Ok(AttemptResult { attempt, success: false });
                }
                req.oauth2 = Some(OAuth2Request { cache_key: endpoint.id.clone(), config: config.clone() });
            }
            None => {}
        }

        match self.dispatcher.send(req).await {
            Ok(resp) => {
                let success = resp.is_success();
                attempt.response_status = Some(resp.status);
                attempt.response_body = resp.body_text();
                attempt.response_headers = resp.headers;
                attempt.request_headers = resp.request_headers;
                attempt.ip_address = resp.ip;
                attempt.user_agent = Some(resp.user_agent);
                attempt.duration_ms = resp.latency.as_millis() as u64;
                attempt.success = success;
                Ok(AttemptResult { attempt, success })
            }
            Err(e) if e.is_retryable() => {
                if matches!(e, DispatchError::OAuth2(_)) {
                    self.dispatcher.invalidate_token(&endpoint.id);
                }
                attempt.error = Some(e.to_string());
                Ok(AttemptResult { attempt, success: false })
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl JobHandler for DeliveryProcessor {
    async fn handle(&self, job: &Job) -> Result<HandlerOutcome> {
        let req: DeliveryRequest = serde_json::from_value(job.payload.clone())?;

        let Some(mut delivery) = self.repos.deliveries.find_delivery(&req.project_id, &req.delivery_id).await? else {
            warn!(delivery_id = %req.delivery_id, "Delivery not found, dropping job");
            return Ok(HandlerOutcome::Done);
        };
        if delivery.status.is_final() {
            debug!(delivery_id = %delivery.id, status = %delivery.status, "Delivery already final");
            return Ok(HandlerOutcome::Done);
        }
        if req.trial != delivery.metadata.num_trials {
            debug!(
                delivery_id = %delivery.id,
                job_trial = req.trial,
                trials = delivery.metadata.num_trials,
                "Stale delivery job, trial already performed"
            );
            return Ok(HandlerOutcome::Done);
        }
        if delivery.status == DeliveryStatus::Processing {
            let held = (Utc::now() - delivery.updated_at).num_seconds();
            if held < PROCESSING_LEASE_SECS {
                debug!(delivery_id = %delivery.id, "Delivery attempt already in progress");
                return Ok(HandlerOutcome::Reschedule(Duration::from_secs(
                    (PROCESSING_LEASE_SECS - held.max(0)) as u64,
                )));
            }
            warn!(delivery_id = %delivery.id, "Taking over abandoned delivery attempt");
        }

        let endpoint = match self.repos.endpoints.find_endpoint(&delivery.project_id, &delivery.endpoint_id).await? {
            Some(e) if e.is_active() => e,
            Some(e) => {
                self.recorder.discard(&mut delivery, format!("endpoint is {:?}", e.status).to_lowercase()).await?;
                return Ok(HandlerOutcome::Done);
            }
            None => {
                self.recorder.discard(&mut delivery, "endpoint no longer exists").await?;
                return Ok(HandlerOutcome::Done);
            }
        };

        let Some(event) = self.repos.events.find_event(&delivery.project_id, &delivery.event_id).await? else {
            self.recorder.fail(&mut delivery, "event no longer exists").await?;
            return Ok(HandlerOutcome::Done);
        };
        let project = self.repos.projects.find_project(&delivery.project_id).await?;

        if let Some(wait) = self.rate_limit_wait(&endpoint) {
            debug!(delivery_id = %delivery.id, endpoint_id = %endpoint.id, "Endpoint rate limited");
            return Ok(HandlerOutcome::Reschedule(wait.max(Duration::from_millis(100))));
        }
        // Every exit below settles the permit or drops it, which releases a half-open trial
        let permit = match self.breakers.acquire(&endpoint.id) {
            Ok(permit) => permit,
            Err(retry_after) => {
                debug!(delivery_id = %delivery.id, endpoint_id = %endpoint.id, "Circuit open, deferring delivery");
                return Ok(HandlerOutcome::Reschedule(retry_after));
            }
        };

        self.recorder.mark_processing(&mut delivery).await?;

        let AttemptResult { attempt, success } =
            match self.attempt(&delivery, &endpoint, project.as_ref(), &event.data).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(delivery_id = %delivery.id, error = %e, "Delivery failed without an attempt");
                    self.recorder.fail(&mut delivery, e.to_string()).await?;
                    counter!("hookrelay_delivery_attempts_total", "outcome" => "rejected").increment(1);
                    return Ok(HandlerOutcome::Done);
                }
            };

        if success {
            permit.success();
        } else {
            permit.failure();
        }

        let verdict = self.retry.apply(&mut delivery.metadata, success, Utc::now());
        self.recorder.record(&mut delivery, &attempt, verdict).await?;

        let outcome = match verdict {
            AttemptVerdict::Delivered => "delivered",
            AttemptVerdict::Exhausted => {
                info!(
                    delivery_id = %delivery.id,
                    trials = delivery.metadata.num_trials,
                    "Delivery failed, retry limit reached"
                );
                "exhausted"
            }
            AttemptVerdict::Retry { next_send_time, delay } => {
                let next = delivery_job(&delivery, delivery.metadata.num_trials, self.max_job_retries)?
                    .process_at(next_send_time);
                self.queue.enqueue(next).await?;
                debug!(
                    delivery_id = %delivery.id,
                    trials = delivery.metadata.num_trials,
                    delay_secs = delay.as_secs(),
                    "Delivery retry scheduled"
                );
                "retry"
            }
        };
        counter!("hookrelay_delivery_attempts_total", "outcome" => outcome).increment(1);
        Ok(HandlerOutcome::Done)
    }
}
