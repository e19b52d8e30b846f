use thiserror::Error;

/// Why a message was dropped at the ingestion boundary. Rejected messages are
/// acknowledged so the broker does not redeliver them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("unsupported dispatch mode: {0}")]
    UnsupportedMode(String),

    #[error("malformed JSON body: {0}")]
    MalformedJson(String),

    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("validation failed: {0}")]
    Validation(String),
}

impl Rejection {
    /// Metric label
    pub fn reason(&self) -> &'static str {
        match self {
            Rejection::UnsupportedMode(_) => "unsupported_mode",
            Rejection::MalformedJson(_) => "malformed_json",
            Rejection::InvalidEnvelope(_) => "invalid_envelope",
            Rejection::Validation(_) => "validation",
        }
    }
}

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("SQS error: {0}")]
    Sqs(String),

    #[error("Pub/Sub error: {0}")]
    PubSub(String),

    #[error("AMQP error: {0}")]
    Amqp(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid source configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, IngestError>;
