//! HTTP clients per client certificate
//!
//! Endpoints without a certificate share one client. Endpoints presenting a
//! certificate get a dedicated client, built once per certificate and reused.

use std::net::IpAddr;
use std::time::Duration;

use dashmap::DashMap;
use hr_platform::ClientCertificate;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::error::{DispatchError, Result};

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub user_agent: String,
    pub connect_timeout: Duration,
    pub allow_insecure_tls: bool,
    pub local_address: Option<IpAddr>,
}

pub struct ClientPool {
    settings: ClientSettings,
    default_client: reqwest::Client,
    by_certificate: DashMap<String, reqwest::Client>,
}

impl ClientPool {
    pub fn new(settings: ClientSettings) -> Result<Self> {
        let default_client = build(&settings, None)?;
        Ok(Self { settings, default_client, by_certificate: DashMap::new() })
    }

    pub fn default_client(&self) -> &reqwest::Client {
        &self.default_client
    }

    pub fn client_for(&self, certificate: Option<&ClientCertificate>) -> Result<reqwest::Client> {
        let Some(cert) = certificate else {
            return Ok(self.default_client.clone());
        };

        let key = fingerprint(cert);
        if let Some(client) = self.by_certificate.get(&key) {
            return Ok(client.clone());
        }

        let client = build(&self.settings, Some(cert))?;
        info!(fingerprint = %&key[..16], "Built mTLS client");
        self.by_certificate.insert(key, client.clone());
        Ok(client)
    }

    pub fn cached_certificates(&self) -> usize {
        self.by_certificate.len()
    }
}

fn fingerprint(cert: &ClientCertificate) -> String {
    let mut hasher = Sha256::new();
    hasher.update(cert.cert_pem.as_bytes());
    hasher.update(cert.key_pem.as_bytes());
    hex::encode(hasher.finalize())
}

fn build(settings: &ClientSettings, certificate: Option<&ClientCertificate>) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .use_rustls_tls()
        .user_agent(settings.user_agent.clone())
        .connect_timeout(settings.connect_timeout)
        .danger_accept_invalid_certs(settings.allow_insecure_tls)
        .local_address(settings.local_address);

    if let Some(cert) = certificate {
        let mut pem = Vec::with_capacity(cert.cert_pem.len() + cert.key_pem.len() + 1);
        pem.extend_from_slice(cert.cert_pem.as_bytes());
        pem.push(b'\n');
        pem.extend_from_slice(cert.key_pem.as_bytes());
        let identity = reqwest::Identity::from_pem(&pem)
            .map_err(|e| DispatchError::ClientCertificate(e.to_string()))?;
        builder = builder.identity(identity);
    }

    builder
        .build()
        .map_err(|e| DispatchError::InvalidRequest(format!("failed to build http client: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> ClientSettings {
        ClientSettings {
            user_agent: "HookRelay/test".into(),
            connect_timeout: Duration::from_secs(5),
            allow_insecure_tls: false,
            local_address: None,
        }
    }

    #[test]
    fn test_client_reused_per_certificate() {
        let pool = ClientPool::new(settings()).unwrap();
        let cert = ClientCertificate {
            cert_pem: include_str!("../tests/fixtures/client_cert.pem").into(),
            key_pem: include_str!("../tests/fixtures/client_key.pem").into(),
        };
        pool.client_for(Some(&cert)).unwrap();
        pool.client_for(Some(&cert)).unwrap();
        pool.client_for(None).unwrap();
        assert_eq!(pool.cached_certificates(), 1);
    }

    #[test]
    fn test_invalid_certificate_rejected() {
        let pool = ClientPool::new(settings()).unwrap();
        let cert = ClientCertificate { cert_pem: "garbage".into(), key_pem: "garbage".into() };
        assert!(matches!(pool.client_for(Some(&cert)), Err(DispatchError::ClientCertificate(_))));
    }
}
