//! HookRelay Server
//!
//! One process running the trigger API, the dispatch worker pool, the
//! lifecycle tasks and every configured broker ingestion source.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `HOOKRELAY_CONFIG` | - | Path to the TOML configuration file |
//! | `HOOKRELAY_SEED` | - | JSON file of projects/endpoints/subscriptions for the in-memory store |
//! | `HOOKRELAY_BIND_ADDR` | `0.0.0.0:5005` | API listen address |
//! | `HOOKRELAY_QUEUE_BACKEND` | `memory` | `memory` or `redis` |
//! | `HOOKRELAY_REDIS_URL` | `redis://127.0.0.1:6379` | Redis URL for the redis backend |
//! | `HOOKRELAY_WORKER_CONCURRENCY` | `50` | Concurrent jobs |
//! | `HOOKRELAY_FLAGS_URL` | - | Remote feature flag service |
//! | `RUST_LOG` | `info` | Log level |

mod seed;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use hr_config::{AppConfig, QueueBackend};
use hr_dispatch::{DispatcherConfig, HttpDispatcher};
use hr_ingest::SourceRunner;
use hr_platform::{
    EventService, FlagEvaluator, RemoteFlags, Repositories, RetryConfig, RetryPolicy, StaticFlags,
    SubscriptionSnapshot,
};
use hr_queue::{MemoryTaskQueue, RedisTaskQueue, TaskQueue, WeightedQueues};
use hr_router::{
    register_processors, CircuitBreakerConfig, CircuitBreakerRegistry, LifecycleConfig, LifecycleManager,
    ProcessorContext, WorkerPool, WorkerPoolConfig,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "hr-server")]
#[command(about = "HookRelay - webhook event dispatch")]
struct Args {
    /// TOML configuration file; defaults plus environment overrides when omitted
    #[arg(long, env = "HOOKRELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Seed data for the in-memory store
    #[arg(long, env = "HOOKRELAY_SEED")]
    seed: Option<PathBuf>,

    /// Emit JSON logs
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::from_env()?,
    };
    hr_common::telemetry::init(args.log_json || config.server.log_json);
    info!("Starting HookRelay server");

    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .context("installing Prometheus recorder")?;

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // Store
    let (repos, store) = Repositories::in_memory();
    if let Some(path) = &args.seed {
        let (projects, endpoints, subscriptions) = seed::Seed::load(path)?.apply(&store);
        info!(projects, endpoints, subscriptions, "Seeded in-memory store");
    }

    // Queue
    let queue: Arc<dyn TaskQueue> = match config.queue.backend {
        QueueBackend::Memory => {
            Arc::new(MemoryTaskQueue::new(Duration::from_secs(config.queue.dedup_retention_secs)))
        }
        QueueBackend::Redis => Arc::new(
            RedisTaskQueue::connect(
                &config.queue.redis_url,
                config.queue.key_prefix.clone(),
                Duration::from_secs(config.queue.dedup_retention_secs),
            )
            .await?
            .with_visibility_timeout(Duration::from_secs(config.queue.visibility_timeout_secs)),
        ),
    };
    info!(queue = %queue.identifier(), "Task queue ready");
    let weights = WeightedQueues::new(hr_common::QueueName::ALL.map(|q| (q, config.queue.weight(q))));

    // Snapshot + trigger service
    let snapshot = Arc::new(SubscriptionSnapshot::new(repos.clone()));
    snapshot.sync().await?;
    let service = Arc::new(
        EventService::new(repos.clone(), queue.clone(), snapshot.clone())
            .with_max_job_retries(config.worker.max_job_retries),
    );

    // Dispatch
    let dispatcher = HttpDispatcher::new(DispatcherConfig {
        timeout: Duration::from_secs(config.dispatcher.timeout_secs),
        max_response_bytes: config.dispatcher.max_response_bytes,
        signature_header: config.dispatcher.signature_header.clone(),
        user_agent: config.dispatcher.user_agent.clone(),
        allow_insecure_tls: config.dispatcher.allow_insecure_tls,
        ..Default::default()
    })?;
    let static_flags = StaticFlags::new(config.flags.enabled.clone());
    let flags: Arc<dyn FlagEvaluator> = match &config.flags.remote_url {
        Some(url) => Arc::new(RemoteFlags::new(url.clone(), static_flags)),
        None => Arc::new(static_flags),
    };
    let retry = RetryPolicy::new(
        RetryConfig {
            strategy: config.retry.strategy.parse().unwrap_or_default(),
            interval_seconds: config.retry.interval_seconds,
            retry_limit: config.retry.retry_limit,
        },
        config.retry.max_backoff_seconds,
    );
    let breakers = Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig {
        enabled: config.circuit_breaker.enabled,
        failure_threshold: config.circuit_breaker.failure_threshold,
        recovery_timeout: Duration::from_secs(config.circuit_breaker.recovery_timeout_secs),
    }));

    // Workers
    let mut pool = WorkerPool::new(
        WorkerPoolConfig {
            concurrency: config.worker.concurrency,
            poll_interval: Duration::from_millis(config.worker.poll_interval_ms),
            rate_limit_per_minute: config.worker.rate_limit_per_minute,
            ..Default::default()
        },
        queue.clone(),
        weights,
    );
    register_processors(
        &mut pool,
        ProcessorContext {
            repos,
            queue: queue.clone(),
            snapshot: snapshot.clone(),
            dispatcher: Arc::new(dispatcher),
            retry,
            flags,
            breakers,
            max_job_retries: config.worker.max_job_retries,
        },
    );
    let pool = Arc::new(pool);
    let pool_handle = pool.clone().start();

    let lifecycle = LifecycleManager::start(
        snapshot,
        queue.clone(),
        LifecycleConfig {
            snapshot_refresh_interval: Duration::from_secs(config.snapshot.refresh_interval_secs),
            ..Default::default()
        },
    );

    // Broker ingestion
    let mut runners = Vec::new();
    let mut ingest_handles = Vec::new();
    for source in &config.sources {
        match SourceRunner::from_config(source, service.clone()).await {
            Ok(runner) => {
                let runner = Arc::new(runner);
                ingest_handles.extend(runner.start());
                runners.push(runner);
            }
            Err(e) => error!(source = %source.id, kind = source.broker.kind(), error = %e, "Failed to start source"),
        }
    }

    // API
    let app = hr_api::create_router(hr_api::AppState {
        service,
        queue,
        metrics: Some(metrics_handle),
    })
    .layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.server.bind_addr))?;
    info!("API server listening on http://{}", config.server.bind_addr);
    let api_handle = {
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.recv().await;
                })
                .await;
            if let Err(e) = served {
                error!(error = %e, "API server error");
            }
        })
    };

    info!(sources = runners.len(), "HookRelay server started");

    shutdown_signal().await;
    info!("Shutdown signal received, initiating graceful shutdown...");

    let _ = shutdown_tx.send(());
    for runner in &runners {
        runner.shutdown();
    }
    pool.shutdown().await;
    lifecycle.shutdown();

    let drained = tokio::time::timeout(Duration::from_secs(30), async {
        for handle in ingest_handles {
            let _ = handle.await;
        }
        if let Some(handle) = pool_handle {
            let _ = handle.await;
        }
        let _ = api_handle.await;
    })
    .await;
    if drained.is_err() {
        warn!("Shutdown timed out with tasks still running");
    }

    info!("HookRelay server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
