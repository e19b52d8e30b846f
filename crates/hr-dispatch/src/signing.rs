//! Payload signatures
//!
//! Simple: lowercase hex HMAC-SHA256 of the body with the newest live secret.
//! Advanced: `t=<unix>,v1=<hex>[,v1=<hex>...]`, one `v1` per live secret,
//! each computed over `<unix>.<body>`, so receivers can verify during rotation.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use hr_platform::Endpoint;
use sha2::Sha256;

use crate::error::{DispatchError, Result};

type HmacSha256 = Hmac<Sha256>;

fn hmac_hex(secret: &[u8], parts: &[&[u8]]) -> String {
    // HMAC accepts keys of any length
    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    for part in parts {
        mac.update(part);
    }
    hex::encode(mac.finalize().into_bytes())
}

pub fn simple_signature(secret: &str, body: &[u8]) -> String {
    hmac_hex(secret.as_bytes(), &[body])
}

pub fn advanced_signature(secrets: &[&str], body: &[u8], timestamp: i64) -> String {
    let ts = timestamp.to_string();
    let mut out = format!("t={}", ts);
    for secret in secrets {
        out.push_str(",v1=");
        out.push_str(&hmac_hex(secret.as_bytes(), &[ts.as_bytes(), b".", body]));
    }
    out
}

/// Signature header value for `endpoint`
pub fn signature_for(endpoint: &Endpoint, body: &[u8], now: DateTime<Utc>) -> Result<String> {
    let live = endpoint.live_secrets(now);
    let newest = live.first().ok_or_else(|| DispatchError::NoLiveSecret(endpoint.id.clone()))?;
    if endpoint.advanced_signatures {
        let secrets: Vec<&str> = live.iter().map(|s| s.value.as_str()).collect();
        Ok(advanced_signature(&secrets, body, now.timestamp()))
    } else {
        Ok(simple_signature(&newest.value, body))
    }
}
