//! HTTP Dispatcher
//!
//! One outbound webhook call. Signature is mandatory; the response body is
//! captured up to a byte cap; the local (outgoing) address and user agent are
//! reported for audit.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use hr_platform::{ClientCertificate, OAuth2Config};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::Method;
use tracing::{debug, warn};

use crate::error::{DispatchError, Result};
use crate::mtls::{ClientPool, ClientSettings};
use crate::oauth2::OAuth2TokenService;

pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub max_response_bytes: usize,
    pub signature_header: String,
    pub user_agent: String,
    pub allow_insecure_tls: bool,
    pub local_address: Option<IpAddr>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            max_response_bytes: 50 * 1024,
            signature_header: "X-HookRelay-Signature".to_string(),
            user_agent: "HookRelay/0.1".to_string(),
            allow_insecure_tls: false,
            local_address: None,
        }
    }
}

/// Bearer token source for one endpoint
#[derive(Debug, Clone)]
pub struct OAuth2Request {
    pub cache_key: String,
    pub config: OAuth2Config,
}

#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub url: String,
    pub method: Method,
    pub body: Vec<u8>,
    pub content_type: String,
    pub signature_header: String,
    pub signature_value: String,
    pub max_response_bytes: usize,
    pub headers: HashMap<String, String>,
    pub idempotency_key: Option<String>,
    pub timeout: Duration,
    pub client_cert: Option<ClientCertificate>,
    pub oauth2: Option<OAuth2Request>,
}

#[derive(Debug, Clone)]
pub struct DispatchResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub truncated: bool,
    /// Local address of the outgoing connection
    pub ip: Option<String>,
    pub user_agent: String,
    /// Headers sent, with credentials redacted
    pub request_headers: HashMap<String, String>,
    pub latency: Duration,
}

impl DispatchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

pub struct HttpDispatcher {
    config: DispatcherConfig,
    clients: ClientPool,
    tokens: OAuth2TokenService,
    local_ips: DashMap<String, Option<IpAddr>>,
}

impl HttpDispatcher {
    pub fn new(config: DispatcherConfig) -> Result<Self> {
        let clients = ClientPool::new(ClientSettings {
            user_agent: config.user_agent.clone(),
            connect_timeout: config.connect_timeout,
            allow_insecure_tls: config.allow_insecure_tls,
            local_address: config.local_address,
        })?;
        let tokens = OAuth2TokenService::new(clients.default_client().clone());
        Ok(Self { config, clients, tokens, local_ips: DashMap::new() })
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn user_agent(&self) -> &str {
        &self.config.user_agent
    }

    /// Request skeleton with the configured defaults
    pub fn request(&self, url: impl Into<String>, body: Vec<u8>, content_type: impl Into<String>) -> DispatchRequest {
        DispatchRequest {
            url: url.into(),
            method: Method::POST,
            body,
            content_type: content_type.into(),
            signature_header: self.config.signature_header.clone(),
            signature_value: String::new(),
            max_response_bytes: self.config.max_response_bytes,
            headers: HashMap::new(),
            idempotency_key: None,
            timeout: self.config.timeout,
            client_cert: None,
            oauth2: None,
        }
    }

    pub async fn send(&self, req: DispatchRequest) -> Result<DispatchResponse> {
        if req.signature_header.trim().is_empty() || req.signature_value.trim().is_empty() {
            return Err(DispatchError::MissingSignature);
        }
        let url = reqwest::Url::parse(&req.url)
            .map_err(|e| DispatchError::InvalidRequest(format!("invalid url {}: {}", req.url, e)))?;

        let client = self.clients.client_for(req.client_cert.as_ref())?;

        let mut headers = HeaderMap::new();
        insert_header(&mut headers, CONTENT_TYPE.as_str(), &req.content_type)?;
        insert_header(&mut headers, USER_AGENT.as_str(), &self.config.user_agent)?;
        for (name, value) in &req.headers {
            insert_header(&mut headers, name, value)?;
        }
        insert_header(&mut headers, &req.signature_header, &req.signature_value)?;
        if let Some(key) = &req.idempotency_key {
            insert_header(&mut headers, IDEMPOTENCY_KEY_HEADER, key)?;
        }
        if let Some(oauth) = &req.oauth2 {
            let token = self.tokens.token(&oauth.cache_key, &oauth.config).await?;
            insert_header(&mut headers, AUTHORIZATION.as_str(), &format!("Bearer {}", token))?;
        }
        let request_headers = audit_headers(&headers);

        let ip = self.outgoing_ip(&url).await;
        let started = Instant::now();
        let result = client
            .request(req.method.clone(), url.clone())
            .headers(headers)
            .timeout(req.timeout)
            .body(req.body)
            .send()
            .await;

        let mut response = match result {
            Ok(r) => r,
            Err(e) => {
                if e.is_builder() {
                    return Err(DispatchError::InvalidRequest(e.to_string()));
                }
                warn!(url = %req.url, error = %e, "Webhook transport failure");
                return Err(DispatchError::Transport(describe(&e)));
            }
        };

        let status = response.status().as_u16();
        let response_headers = response
            .headers()
            .iter()
            .map(|(k, v)| (k.as_str().to_string(), String::from_utf8_lossy(v.as_bytes()).into_owned()))
            .collect();

        let mut body = Vec::new();
        let mut truncated = false;
        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    let remaining = req.max_response_bytes.saturating_sub(body.len());
                    if chunk.len() > remaining {
                        body.extend_from_slice(&chunk[..remaining]);
                        truncated = true;
                        break;
                    }
                    body.extend_from_slice(&chunk);
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(url = %req.url, error = %e, "Response body read interrupted");
                    break;
                }
            }
        }

        let latency = started.elapsed();
        metrics::histogram!("hookrelay_delivery_latency_ms").record(latency.as_secs_f64() * 1000.0);
        debug!(url = %req.url, status, latency_ms = latency.as_millis() as u64, truncated, "Webhook dispatched");

        Ok(DispatchResponse {
            status,
            headers: response_headers,
            body,
            truncated,
            ip: ip.map(|i| i.to_string()),
            user_agent: self.config.user_agent.clone(),
            request_headers,
            latency,
        })
    }

    /// Local address the OS would use to reach `url`'s host
    pub async fn outgoing_ip(&self, url: &reqwest::Url) -> Option<IpAddr> {
        if self.config.local_address.is_some() {
            return self.config.local_address;
        }
        let host = url.host_str()?.to_string();
        let port = url.port_or_known_default().unwrap_or(443);
        let key = format!("{}:{}", host, port);
        if let Some(ip) = self.local_ips.get(&key) {
            return *ip;
        }

        let ip = resolve_local_ip(&host, port).await;
        self.local_ips.insert(key, ip);
        ip
    }

    pub fn invalidate_token(&self, cache_key: &str) {
        self.tokens.invalidate(cache_key);
    }
}

async fn resolve_local_ip(host: &str, port: u16) -> Option<IpAddr> {
    let remote: SocketAddr = tokio::net::lookup_host((host, port)).await.ok()?.next()?;
    let bind: SocketAddr = if remote.is_ipv4() {
        ([0u8; 4], 0).into()
    } else {
        ([0u16; 8], 0).into()
    };
    // A connected UDP socket sends nothing but resolves the route
    let socket = tokio::net::UdpSocket::bind(bind).await.ok()?;
    socket.connect(remote).await.ok()?;
    socket.local_addr().ok().map(|a| a.ip())
}

fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) -> Result<()> {
    let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| DispatchError::InvalidRequest(format!("invalid header name {:?}", name)))?;
    let value = HeaderValue::from_str(value)
        .map_err(|_| DispatchError::InvalidRequest(format!("invalid value for header {}", name)))?;
    headers.insert(name, value);
    Ok(())
}

fn audit_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(k, v)| {
            let value = if k == AUTHORIZATION {
                "Bearer [redacted]".to_string()
            } else {
                String::from_utf8_lossy(v.as_bytes()).into_owned()
            };
            (k.as_str().to_string(), value)
        })
        .collect()
}

fn describe(e: &reqwest::Error) -> String {
    let kind = if e.is_timeout() {
        "timeout"
    } else if e.is_connect() {
        "connect"
    } else {
        "request"
    };
    let mut message = format!("{}: {}", kind, e);
    let mut source = std::error::Error::source(e);
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}
