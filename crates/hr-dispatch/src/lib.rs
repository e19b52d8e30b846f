//! HookRelay HTTP Dispatcher
//!
//! Performs the outbound webhook call:
//! - Content-type conversion (JSON pass-through, form-url-encoded flattening)
//! - HMAC-SHA256 payload signatures (simple and timestamped multi-secret)
//! - Per-call timeouts and capped response capture
//! - Mutual TLS with per-certificate client reuse
//! - OAuth2 client-credentials tokens (client secret or ES256/RS256 client assertion)

pub mod converter;
pub mod dispatcher;
pub mod error;
pub mod mtls;
pub mod oauth2;
pub mod signing;

pub use converter::BodyConverter;
pub use dispatcher::{DispatchRequest, DispatchResponse, DispatcherConfig, HttpDispatcher, OAuth2Request};
pub use error::{DispatchError, Result};
pub use oauth2::OAuth2TokenService;
pub use signing::{advanced_signature, simple_signature, signature_for};
