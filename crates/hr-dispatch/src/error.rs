use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// Outbound payloads must be signed. Caller error, never retried.
    #[error("signature header and value are required")]
    MissingSignature,

    /// Every secret of the endpoint has expired, or it never had one
    #[error("endpoint {0} has no live signing secret")]
    NoLiveSecret(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid client certificate: {0}")]
    ClientCertificate(String),

    #[error("oauth2 token acquisition failed: {0}")]
    OAuth2(String),

    /// Connection refused, timeout, TLS handshake failure and the like
    #[error("transport error: {0}")]
    Transport(String),
}

impl DispatchError {
    /// Configuration/caller errors fail the delivery without retry
    pub fn is_retryable(&self) -> bool {
        matches!(self, DispatchError::OAuth2(_) | DispatchError::Transport(_))
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;
