//! Project
//!
//! Tenancy boundary. Owned by the external store; the core only reads it for
//! the organisation id (flag scoping) and the project-wide delivery defaults.

use serde::{Deserialize, Serialize};

use super::delivery::RetryConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub organisation_id: String,
    pub name: String,
    #[serde(default)]
    pub config: ProjectConfig,
}

/// Project-wide delivery defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Overrides the global retry defaults when set
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    /// Overrides the dispatcher signature header name when set
    #[serde(default)]
    pub signature_header: Option<String>,
    #[serde(default)]
    pub max_response_bytes: Option<usize>,
}

impl Project {
    pub fn new(id: impl Into<String>, organisation_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            organisation_id: organisation_id.into(),
            name: name.into(),
            config: ProjectConfig::default(),
        }
    }
}
