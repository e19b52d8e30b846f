//! Google Cloud Pub/Sub source over the REST API
//!
//! `:pull` for synchronous batches, `:acknowledge` to ack and
//! `:modifyAckDeadline` with a zero deadline to nack.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::{BrokerSource, IngestError, RawMessage, Result};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullResponse {
    #[serde(default)]
    received_messages: Vec<ReceivedMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceivedMessage {
    ack_id: String,
    message: PubsubMessage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PubsubMessage {
    #[serde(default)]
    data: String,
    #[serde(default)]
    attributes: HashMap<String, String>,
    message_id: String,
}

pub struct PubSubSource {
    identifier: String,
    client: reqwest::Client,
    subscription_url: String,
    access_token: Option<String>,
}

impl PubSubSource {
    pub fn new(
        identifier: &str,
        endpoint: &str,
        project: &str,
        subscription: &str,
        access_token: Option<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(Duration::from_secs(60)).build()?;
        Ok(Self {
            identifier: identifier.to_string(),
            client,
            subscription_url: format!(
                "{}/v1/projects/{}/subscriptions/{}",
                endpoint.trim_end_matches('/'),
                project,
                subscription
            ),
            access_token: access_token.filter(|t| !t.is_empty()),
        })
    }

    async fn call(&self, verb: &str, body: serde_json::Value) -> Result<reqwest::Response> {
        let mut req = self.client.post(format!("{}:{}", self.subscription_url, verb)).json(&body);
        if let Some(token) = &self.access_token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(IngestError::PubSub(format!("{} returned {}: {}", verb, status, text)));
        }
        Ok(resp)
    }
}

#[async_trait]
impl BrokerSource for PubSubSource {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn poll(&self, max: u32) -> Result<Vec<RawMessage>> {
        let resp: PullResponse = self.call("pull", json!({ "maxMessages": max.max(1) })).await?.json().await?;

        let mut messages = Vec::with_capacity(resp.received_messages.len());
        for received in resp.received_messages {
            let body = match STANDARD.decode(received.message.data.as_bytes()) {
                Ok(body) => body,
                Err(e) => {
                    // Left for the normalizer to reject as malformed
                    warn!(source = %self.identifier, message_id = %received.message.message_id, error = %e, "Undecodable Pub/Sub data");
                    received.message.data.into_bytes()
                }
            };
            messages.push(RawMessage {
                id: received.message.message_id,
                body,
                attributes: received.message.attributes,
                handle: received.ack_id,
            });
        }
        debug!(source = %self.identifier, count = messages.len(), "Pulled Pub/Sub messages");
        Ok(messages)
    }

    async fn ack(&self, message: &RawMessage) -> Result<()> {
        self.call("acknowledge", json!({ "ackIds": [message.handle] })).await?;
        Ok(())
    }

    async fn nack(&self, message: &RawMessage) -> Result<()> {
        self.call("modifyAckDeadline", json!({ "ackIds": [message.handle], "ackDeadlineSeconds": 0 }))
            .await?;
        Ok(())
    }
}
