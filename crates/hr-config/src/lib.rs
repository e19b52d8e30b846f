//! HookRelay configuration
//!
//! Loads an [`AppConfig`] snapshot from a TOML file and applies `HOOKRELAY_*`
//! environment overrides on top. Every section has serde defaults so an empty
//! file is a valid development configuration.

use std::collections::HashMap;
use std::path::Path;

use hr_common::QueueName;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub log_json: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5005".to_string(),
            log_json: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    Memory,
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSection {
    pub backend: QueueBackend,
    pub redis_url: String,
    pub key_prefix: String,
    /// How long a completed job id keeps absorbing duplicate enqueues
    pub dedup_retention_secs: u64,
    /// How long a dequeued job may stay in flight before it is handed out again (redis backend)
    pub visibility_timeout_secs: u64,
    /// Poll weight per queue; missing queues use their default weight
    pub weights: HashMap<String, u32>,
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            backend: QueueBackend::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "hookrelay".to_string(),
            dedup_retention_secs: 3600,
            visibility_timeout_secs: 300,
            weights: HashMap::new(),
        }
    }
}

impl QueueSection {
    pub fn weight(&self, queue: QueueName) -> u32 {
        self.weights.get(queue.as_str()).copied().unwrap_or_else(|| queue.default_weight())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSection {
    pub concurrency: u32,
    pub max_job_retries: u32,
    pub poll_interval_ms: u64,
    pub rate_limit_per_minute: Option<u32>,
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            concurrency: 50,
            max_job_retries: 5,
            poll_interval_ms: 100,
            rate_limit_per_minute: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherSection {
    pub timeout_secs: u64,
    pub max_response_bytes: usize,
    pub signature_header: String,
    pub user_agent: String,
    pub allow_insecure_tls: bool,
}

impl Default for DispatcherSection {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_response_bytes: 50 * 1024,
            signature_header: "X-HookRelay-Signature".to_string(),
            user_agent: "HookRelay/0.1".to_string(),
            allow_insecure_tls: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    /// `linear` or `exponential`
    pub strategy: String,
    pub interval_seconds: u64,
    pub retry_limit: u32,
    pub max_backoff_seconds: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            strategy: "exponential".to_string(),
            interval_seconds: 10,
            retry_limit: 10,
            max_backoff_seconds: 7200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSection {
    pub enabled: bool,
    pub failure_threshold: u32,
    pub recovery_timeout_secs: u64,
}

impl Default for CircuitBreakerSection {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 10,
            recovery_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotSection {
    pub refresh_interval_secs: u64,
}

impl Default for SnapshotSection {
    fn default() -> Self {
        Self { refresh_interval_secs: 60 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FlagsSection {
    /// Flag key -> organisations it is enabled for. `"*"` enables it everywhere.
    pub enabled: HashMap<String, Vec<String>>,
    /// Optional remote flag service; takes precedence over the static map when set
    pub remote_url: Option<String>,
}

// ============================================================================
// Broker Sources
// ============================================================================

/// Transport-specific settings of an ingestion source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BrokerConfig {
    Sqs {
        queue_url: String,
        #[serde(default)]
        endpoint_url: Option<String>,
        #[serde(default = "default_sqs_wait")]
        wait_time_seconds: i32,
    },
    Pubsub {
        project: String,
        subscription: String,
        #[serde(default = "default_pubsub_endpoint")]
        endpoint: String,
        #[serde(default)]
        access_token: Option<String>,
    },
    Amqp {
        uri: String,
        queue: String,
    },
    Redis {
        url: String,
        list_key: String,
        /// Names this consumer's processing list; defaults to the source id.
        /// Processes sharing a consumer name recover each other's in-flight messages.
        #[serde(default)]
        consumer: Option<String>,
    },
}

fn default_sqs_wait() -> i32 {
    10
}

fn default_pubsub_endpoint() -> String {
    "https://pubsub.googleapis.com".to_string()
}

impl BrokerConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            BrokerConfig::Sqs { .. } => "sqs",
            BrokerConfig::Pubsub { .. } => "pubsub",
            BrokerConfig::Amqp { .. } => "amqp",
            BrokerConfig::Redis { .. } => "redis",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceConfig {
    pub id: String,
    pub project_id: String,
    #[serde(default = "default_source_workers")]
    pub workers: u32,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    #[serde(default)]
    pub transform: TransformConfig,
    #[serde(flatten)]
    pub broker: BrokerConfig,
}

/// Message rewriting applied before the envelope is parsed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct TransformConfig {
    /// JSON pointer to the envelope inside the message body, e.g. `/Message`
    /// for SNS notifications delivered through SQS. String values are parsed as JSON.
    pub body_pointer: Option<String>,
    /// Headers merged into every event's custom headers; message headers win
    pub headers: HashMap<String, String>,
}

fn default_source_workers() -> u32 {
    1
}

fn default_batch_size() -> u32 {
    10
}

// ============================================================================
// Root
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub queue: QueueSection,
    pub worker: WorkerSection,
    pub dispatcher: DispatcherSection,
    pub retry: RetrySection,
    pub circuit_breaker: CircuitBreakerSection,
    pub snapshot: SnapshotSection,
    pub flags: FlagsSection,
    pub sources: Vec<SourceConfig>,
}

impl AppConfig {
    /// Parse a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        Ok(config)
    }

    /// Load from a file, apply environment overrides and validate
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut config = Self::from_toml_str(&raw)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        info!(path = %path.display(), sources = config.sources.len(), "Loaded configuration");
        Ok(config)
    }

    /// Defaults plus environment overrides, used when no file is given
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply `HOOKRELAY_*` overrides read through `lookup`
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("HOOKRELAY_BIND_ADDR") {
            self.server.bind_addr = v;
        }
        if let Some(v) = lookup("HOOKRELAY_LOG_JSON").and_then(|v| v.parse().ok()) {
            self.server.log_json = v;
        }
        if let Some(v) = lookup("HOOKRELAY_QUEUE_BACKEND") {
            match v.to_ascii_lowercase().as_str() {
                "redis" => self.queue.backend = QueueBackend::Redis,
                "memory" => self.queue.backend = QueueBackend::Memory,
                other => debug!(value = %other, "Ignoring unknown HOOKRELAY_QUEUE_BACKEND"),
            }
        }
        if let Some(v) = lookup("HOOKRELAY_REDIS_URL") {
            self.queue.redis_url = v;
        }
        if let Some(v) = lookup("HOOKRELAY_WORKER_CONCURRENCY").and_then(|v| v.parse().ok()) {
            self.worker.concurrency = v;
        }
        if let Some(v) = lookup("HOOKRELAY_SIGNATURE_HEADER") {
            self.dispatcher.signature_header = v;
        }
        if let Some(v) = lookup("HOOKRELAY_DISPATCH_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.dispatcher.timeout_secs = v;
        }
        if let Some(v) = lookup("HOOKRELAY_FLAGS_URL") {
            self.flags.remote_url = Some(v);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker.concurrency == 0 {
            return Err(ConfigError::Invalid("worker.concurrency must be greater than 0".into()));
        }
        if self.dispatcher.signature_header.trim().is_empty() {
            return Err(ConfigError::Invalid("dispatcher.signature_header must not be empty".into()));
        }
        if self.dispatcher.timeout_secs == 0 {
            return Err(ConfigError::Invalid("dispatcher.timeout_secs must be greater than 0".into()));
        }
        match self.retry.strategy.as_str() {
            "linear" | "exponential" => {}
            other => {
                return Err(ConfigError::Invalid(format!("unknown retry strategy: {}", other)));
            }
        }

        let mut seen = std::collections::HashSet::new();
        for source in &self.sources {
            if !seen.insert(source.id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate source id: {}", source.id)));
            }
            if source.workers == 0 {
                return Err(ConfigError::Invalid(format!("source {} has zero workers", source.id)));
            }
            if source.project_id.is_empty() {
                return Err(ConfigError::Invalid(format!("source {} has no project_id", source.id)));
            }
        }
        Ok(())
    }
}
