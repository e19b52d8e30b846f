//! Endpoint
//!
//! Delivery target. Mutated by administrative operations outside the core;
//! referenced, never owned, by the dispatch engine.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EndpointStatus {
    #[default]
    Active,
    Inactive,
    Paused,
}

/// Body encoding preference
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ContentType {
    #[default]
    #[serde(rename = "application/json")]
    Json,
    #[serde(rename = "application/x-www-form-urlencoded")]
    FormUrlEncoded,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Json => "application/json",
            ContentType::FormUrlEncoded => "application/x-www-form-urlencoded",
        }
    }
}

/// Signing secret. Several may be live at once during rotation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EndpointSecret {
    pub value: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl EndpointSecret {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            created_at: Utc::now(),
            expires_at: None,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|exp| exp <= now).unwrap_or(false)
    }
}

/// PEM-encoded client certificate presented during mutual TLS
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ClientCertificate {
    pub cert_pem: String,
    pub key_pem: String,
}

/// Signed JWT used in place of a client secret
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientAssertion {
    /// PEM private key (EC P-256 for ES256, RSA for RS256)
    pub signing_key_pem: String,
    /// `ES256` or `RS256`
    #[serde(default = "default_signing_algorithm")]
    pub signing_algorithm: String,
    #[serde(default)]
    pub key_id: Option<String>,
    /// Defaults to the client id
    #[serde(default)]
    pub issuer: Option<String>,
    /// Defaults to the client id
    #[serde(default)]
    pub subject: Option<String>,
}

fn default_signing_algorithm() -> String {
    "ES256".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OAuth2AuthType {
    SharedSecret { client_secret: String },
    ClientAssertion(ClientAssertion),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OAuth2Config {
    /// Token endpoint
    pub url: String,
    pub client_id: String,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub audience: Option<String>,
    pub authentication: OAuth2AuthType,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EndpointAuthentication {
    /// Static header shared with the receiver
    SharedSecret { header_name: String, header_value: String },
    #[serde(rename = "oauth2")]
    OAuth2(OAuth2Config),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: String,
    pub project_id: String,
    /// Groups endpoints for fan-out
    #[serde(default)]
    pub owner_id: Option<String>,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub secrets: Vec<EndpointSecret>,
    #[serde(default)]
    pub status: EndpointStatus,
    #[serde(default)]
    pub authentication: Option<EndpointAuthentication>,
    #[serde(default)]
    pub client_certificate: Option<ClientCertificate>,
    #[serde(default)]
    pub content_type: ContentType,
    #[serde(default)]
    pub advanced_signatures: bool,
    #[serde(default)]
    pub rate_limit_per_minute: Option<u32>,
    /// Overrides the dispatcher default timeout
    #[serde(default)]
    pub http_timeout_secs: Option<u64>,
    #[serde(default)]
    pub custom_headers: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Endpoint {
    pub fn new(project_id: impl Into<String>, name: impl Into<String>, url: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: super::new_id(),
            project_id: project_id.into(),
            owner_id: None,
            name: name.into(),
            url: url.into(),
            secrets: Vec::new(),
            status: EndpointStatus::Active,
            authentication: None,
            client_certificate: None,
            content_type: ContentType::Json,
            advanced_signatures: false,
            rate_limit_per_minute: None,
            http_timeout_secs: None,
            custom_headers: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secrets.push(EndpointSecret::new(secret));
        self
    }

    pub fn with_status(mut self, status: EndpointStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == EndpointStatus::Active
    }

    /// Secrets usable for signing at `now`, newest first
    pub fn live_secrets(&self, now: DateTime<Utc>) -> Vec<&EndpointSecret> {
        let mut live: Vec<&EndpointSecret> = self.secrets.iter().filter(|s| !s.is_expired_at(now)).collect();
        live.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        live
    }

    pub fn oauth2(&self) -> Option<&OAuth2Config> {
        match &self.authentication {
            Some(EndpointAuthentication::OAuth2(cfg)) => Some(cfg),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_live_secrets_skip_expired_and_order_newest_first() {
        let now = Utc::now();
        let mut ep = Endpoint::new("p1", "orders", "https://example.com/hook");
        ep.secrets = vec![
            EndpointSecret { value: "old".into(), created_at: now - Duration::days(10), expires_at: None },
            EndpointSecret {
                value: "expired".into(),
                created_at: now - Duration::days(5),
                expires_at: Some(now - Duration::hours(1)),
            },
            EndpointSecret { value: "new".into(), created_at: now - Duration::days(1), expires_at: None },
        ];

        let live: Vec<&str> = ep.live_secrets(now).iter().map(|s| s.value.as_str()).collect();
        assert_eq!(live, vec!["new", "old"]);
    }

    #[test]
    fn test_authentication_serde_shape() {
        let json = r#"{"type":"oauth2","url":"https://auth.example.com/token","client_id":"c1",
            "authentication":{"type":"shared_secret","client_secret":"s"}}"#;
        let auth: EndpointAuthentication = serde_json::from_str(json).unwrap();
        match auth {
            EndpointAuthentication::OAuth2(cfg) => {
                assert_eq!(cfg.client_id, "c1");
                assert!(matches!(cfg.authentication, OAuth2AuthType::SharedSecret { .. }));
            }
            other => panic!("unexpected auth {:?}", other),
        }
    }

    #[test]
    fn test_content_type_strings() {
        assert_eq!(ContentType::Json.as_str(), "application/json");
        let ct: ContentType = serde_json::from_str("\"application/x-www-form-urlencoded\"").unwrap();
        assert_eq!(ct, ContentType::FormUrlEncoded);
    }
}
