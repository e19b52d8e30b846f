//! OAuth2 client-credentials tokens
//!
//! Tokens are cached per endpoint until shortly before expiry. Two client
//! authentication shapes: shared secret, or a signed JWT client assertion.

use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use hr_platform::{ClientAssertion, OAuth2AuthType, OAuth2Config};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{DispatchError, Result};

pub const CLIENT_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

const DEFAULT_EXPIRES_IN_SECS: u64 = 300;
const EXPIRY_SKEW: Duration = Duration::from_secs(30);
const ASSERTION_LIFETIME_SECS: i64 = 300;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AssertionClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

pub struct OAuth2TokenService {
    client: reqwest::Client,
    cache: DashMap<String, CachedToken>,
}

impl OAuth2TokenService {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client, cache: DashMap::new() }
    }

    /// Cached token for `cache_key`, fetching a new one when absent or expired
    pub async fn token(&self, cache_key: &str, config: &OAuth2Config) -> Result<String> {
        if let Some(cached) = self.cache.get(cache_key) {
            if cached.expires_at > Instant::now() {
                return Ok(cached.access_token.clone());
            }
        }

        let (access_token, expires_in) = self.fetch(config).await?;
        let ttl = Duration::from_secs(expires_in).saturating_sub(EXPIRY_SKEW);
        if !ttl.is_zero() {
            self.cache.insert(
                cache_key.to_string(),
                CachedToken { access_token: access_token.clone(), expires_at: Instant::now() + ttl },
            );
        }
        debug!(cache_key = %cache_key, expires_in, "Fetched OAuth2 token");
        Ok(access_token)
    }

    pub fn invalidate(&self, cache_key: &str) {
        self.cache.remove(cache_key);
    }

    async fn fetch(&self, config: &OAuth2Config) -> Result<(String, u64)> {
        let mut form: Vec<(&str, String)> = vec![
            ("grant_type", "client_credentials".to_string()),
            ("client_id", config.client_id.clone()),
        ];
        match &config.authentication {
            OAuth2AuthType::SharedSecret { client_secret } => {
                form.push(("client_secret", client_secret.clone()));
            }
            OAuth2AuthType::ClientAssertion(assertion) => {
                form.push(("client_assertion", client_assertion(config, assertion)?));
                form.push(("client_assertion_type", CLIENT_ASSERTION_TYPE.to_string()));
            }
        }
        if let Some(scope) = &config.scope {
            form.push(("scope", scope.clone()));
        }
        if let Some(audience) = &config.audience {
            form.push(("audience", audience.clone()));
        }

        let response = self
            .client
            .post(&config.url)
            .form(&form)
            .send()
            .await
            .map_err(|e| DispatchError::OAuth2(format!("token endpoint unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(url = %config.url, status = status.as_u16(), "OAuth2 token request rejected");
            return Err(DispatchError::OAuth2(format!("token endpoint returned {}: {}", status, body)));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| DispatchError::OAuth2(format!("invalid token response: {}", e)))?;
        if token.access_token.is_empty() {
            return Err(DispatchError::OAuth2("token response without access_token".to_string()));
        }
        Ok((token.access_token, token.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS)))
    }
}

/// Signed JWT authenticating the client to the token endpoint
pub fn client_assertion(config: &OAuth2Config, assertion: &ClientAssertion) -> Result<String> {
    let (algorithm, key) = match assertion.signing_algorithm.to_ascii_uppercase().as_str() {
        "ES256" => (
            Algorithm::ES256,
            EncodingKey::from_ec_pem(assertion.signing_key_pem.as_bytes())
                .map_err(|e| DispatchError::OAuth2(format!("invalid EC signing key: {}", e)))?,
        ),
        "RS256" => (
            Algorithm::RS256,
            EncodingKey::from_rsa_pem(assertion.signing_key_pem.as_bytes())
                .map_err(|e| DispatchError::OAuth2(format!("invalid RSA signing key: {}", e)))?,
        ),
        other => {
            return Err(DispatchError::OAuth2(format!("unsupported signing algorithm {}", other)));
        }
    };

    let mut header = Header::new(algorithm);
    header.kid = assertion.key_id.clone();

    let now = Utc::now().timestamp();
    let claims = AssertionClaims {
        iss: assertion.issuer.clone().unwrap_or_else(|| config.client_id.clone()),
        sub: assertion.subject.clone().unwrap_or_else(|| config.client_id.clone()),
        aud: config.url.clone(),
        jti: uuid::Uuid::new_v4().to_string(),
        iat: now,
        exp: now + ASSERTION_LIFETIME_SECS,
    };

    encode(&header, &claims, &key).map_err(|e| DispatchError::OAuth2(format!("failed to sign client assertion: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{decode, DecodingKey, Validation};
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const EC_PRIVATE: &str = include_str!("../tests/fixtures/ec_private.pem");
    const EC_PUBLIC: &str = include_str!("../tests/fixtures/ec_public.pem");

    fn shared_secret_config(url: String) -> OAuth2Config {
        OAuth2Config {
            url,
            client_id: "client-1".into(),
            scope: Some("webhooks".into()),
            audience: None,
            authentication: OAuth2AuthType::SharedSecret { client_secret: "s3cret".into() },
        }
    }

    #[tokio::test]
    async fn test_shared_secret_token_is_cached() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .and(body_string_contains("client_secret=s3cret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "tok-1", "token_type": "Bearer", "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let service = OAuth2TokenService::new(reqwest::Client::new());
        let config = shared_secret_config(format!("{}/token", server.uri()));
        assert_eq!(service.token("ep-1", &config).await.unwrap(), "tok-1");
        assert_eq!(service.token("ep-1", &config).await.unwrap(), "tok-1");
    }

    #[tokio::test]
    async fn test_token_endpoint_failure_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad client"))
            .mount(&server)
            .await;

        let service = OAuth2TokenService::new(reqwest::Client::new());
        let err = service
            .token("ep-1", &shared_secret_config(format!("{}/token", server.uri())))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::OAuth2(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_client_assertion_posted_instead_of_secret() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("client_assertion_type=urn%3Aietf%3Aparams%3Aoauth%3Aclient-assertion-type%3Ajwt-bearer"))
            .and(body_string_contains("client_assertion="))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"access_token": "tok-2"})))
            .expect(1)
            .mount(&server)
            .await;

        let config = OAuth2Config {
            url: format!("{}/token", server.uri()),
            client_id: "client-2".into(),
            scope: None,
            audience: None,
            authentication: OAuth2AuthType::ClientAssertion(ClientAssertion {
                signing_key_pem: EC_PRIVATE.into(),
                signing_algorithm: "ES256".into(),
                key_id: Some("kid-1".into()),
                issuer: None,
                subject: None,
            }),
        };
        let service = OAuth2TokenService::new(reqwest::Client::new());
        assert_eq!(service.token("ep-2", &config).await.unwrap(), "tok-2");
    }

    #[test]
    fn test_client_assertion_claims_verify() {
        let config = OAuth2Config {
            url: "https://auth.example.com/token".into(),
            client_id: "client-3".into(),
            scope: None,
            audience: None,
            authentication: OAuth2AuthType::SharedSecret { client_secret: String::new() },
        };
        let assertion = ClientAssertion {
            signing_key_pem: EC_PRIVATE.into(),
            signing_algorithm: "ES256".into(),
            key_id: Some("kid-9".into()),
            issuer: None,
            subject: None,
        };
        let jwt = client_assertion(&config, &assertion).unwrap();

        let mut validation = Validation::new(Algorithm::ES256);
        validation.set_audience(&["https://auth.example.com/token"]);
        let decoded = decode::<AssertionClaims>(
            &jwt,
            &DecodingKey::from_ec_pem(EC_PUBLIC.as_bytes()).unwrap(),
            &validation,
        )
        .unwrap();
        assert_eq!(decoded.header.kid.as_deref(), Some("kid-9"));
        assert_eq!(decoded.claims.iss, "client-3");
        assert_eq!(decoded.claims.sub, "client-3");
        assert!(decoded.claims.exp > decoded.claims.iat);
    }

    #[test]
    fn test_bad_signing_key_rejected() {
        let config = shared_secret_config("https://auth.example.com/token".into());
        let assertion = ClientAssertion {
            signing_key_pem: "not a key".into(),
            signing_algorithm: "ES256".into(),
            key_id: None,
            issuer: None,
            subject: None,
        };
        assert!(client_assertion(&config, &assertion).is_err());
    }
}
