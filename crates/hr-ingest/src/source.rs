use std::collections::HashMap;

use async_trait::async_trait;

use crate::Result;

/// One message as pulled from a broker
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    /// Broker-assigned id; stable across redeliveries
    pub id: String,
    pub body: Vec<u8>,
    /// Message attributes / headers
    pub attributes: HashMap<String, String>,
    /// Opaque token passed back to `ack`/`nack`
    pub handle: String,
}

impl RawMessage {
    /// Attribute lookup ignoring ASCII case
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A pull-based broker subscription
#[async_trait]
pub trait BrokerSource: Send + Sync {
    fn identifier(&self) -> &str;

    /// Fetch up to `max` messages; may wait for the transport's long-poll interval
    async fn poll(&self, max: u32) -> Result<Vec<RawMessage>>;

    /// Remove the message from the broker
    async fn ack(&self, message: &RawMessage) -> Result<()>;

    /// Return the message to the broker for redelivery
    async fn nack(&self, message: &RawMessage) -> Result<()>;
}
