//! Amazon SQS source
//!
//! Long-polls with all message attributes. Ack deletes the message; nack
//! resets its visibility timeout so it is redelivered immediately.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_sqs::Client;
use tracing::{debug, info};

use crate::{BrokerSource, IngestError, RawMessage, Result};

/// SQS caps a single receive at ten messages
const MAX_RECEIVE: u32 = 10;

pub struct SqsSource {
    identifier: String,
    client: Client,
    queue_url: String,
    wait_time_seconds: i32,
}

impl SqsSource {
    pub async fn connect(identifier: &str, queue_url: &str, endpoint_url: Option<&str>, wait_time_seconds: i32) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(url) = endpoint_url {
            loader = loader.endpoint_url(url);
        }
        let aws_config = loader.load().await;
        info!(source = %identifier, queue_url = %queue_url, "SQS source ready");
        Self::with_client(identifier, Client::new(&aws_config), queue_url, wait_time_seconds)
    }

    pub fn with_client(identifier: &str, client: Client, queue_url: &str, wait_time_seconds: i32) -> Self {
        Self {
            identifier: identifier.to_string(),
            client,
            queue_url: queue_url.to_string(),
            wait_time_seconds: wait_time_seconds.clamp(0, 20),
        }
    }
}

#[async_trait]
impl BrokerSource for SqsSource {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn poll(&self, max: u32) -> Result<Vec<RawMessage>> {
        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(max.clamp(1, MAX_RECEIVE) as i32)
            .wait_time_seconds(self.wait_time_seconds)
            .message_attribute_names("All")
            .send()
            .await
            .map_err(|e| IngestError::Sqs(e.to_string()))?;

        let mut messages = Vec::new();
        for msg in output.messages() {
            let (Some(id), Some(handle)) = (msg.message_id(), msg.receipt_handle()) else {
                continue;
            };
            let attributes: HashMap<String, String> = msg
                .message_attributes()
                .map(|attrs| {
                    attrs
                        .iter()
                        .filter_map(|(k, v)| v.string_value().map(|s| (k.clone(), s.to_string())))
                        .collect()
                })
                .unwrap_or_default();
            messages.push(RawMessage {
                id: id.to_string(),
                body: msg.body().unwrap_or_default().as_bytes().to_vec(),
                attributes,
                handle: handle.to_string(),
            });
        }
        debug!(source = %self.identifier, count = messages.len(), "Received SQS messages");
        Ok(messages)
    }

    async fn ack(&self, message: &RawMessage) -> Result<()> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(&message.handle)
            .send()
            .await
            .map_err(|e| IngestError::Sqs(e.to_string()))?;
        Ok(())
    }

    async fn nack(&self, message: &RawMessage) -> Result<()> {
        self.client
            .change_message_visibility()
            .queue_url(&self.queue_url)
            .receipt_handle(&message.handle)
            .visibility_timeout(0)
            .send()
            .await
            .map_err(|e| IngestError::Sqs(e.to_string()))?;
        Ok(())
    }
}
