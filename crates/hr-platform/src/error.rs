//! Platform Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Duplicate entity: {entity_type} with {field}={value}")]
    Duplicate { entity_type: String, field: String, value: String },

    /// Rejection at the ingestion/API boundary. Never retried.
    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Invalid filter: {message}")]
    InvalidFilter { message: String },

    #[error("Queue error: {0}")]
    Queue(#[from] hr_queue::QueueError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Storage error: {message}")]
    Storage { message: String },
}

impl PlatformError {
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn duplicate(entity_type: impl Into<String>, field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Duplicate {
            entity_type: entity_type.into(),
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    pub fn invalid_filter(message: impl Into<String>) -> Self {
        Self::InvalidFilter { message: message.into() }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage { message: message.into() }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, PlatformError>;
