//! AMQP 0-9-1 source (RabbitMQ)
//!
//! Pulls with `basic.get` so batch size is driven by the runner. Headers of
//! string type become message attributes.

use std::collections::HashMap;

use async_trait::async_trait;
use lapin::options::{BasicAckOptions, BasicGetOptions, BasicNackOptions, QueueDeclareOptions};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{Channel, Connection, ConnectionProperties};
use tracing::info;

use super::content_id;
use crate::{BrokerSource, IngestError, RawMessage, Result};

pub struct AmqpSource {
    identifier: String,
    queue: String,
    channel: Channel,
    _connection: Connection,
}

fn amqp_err(e: lapin::Error) -> IngestError {
    IngestError::Amqp(e.to_string())
}

impl AmqpSource {
    pub async fn connect(identifier: &str, uri: &str, queue: &str) -> Result<Self> {
        let connection = Connection::connect(uri, ConnectionProperties::default()).await.map_err(amqp_err)?;
        let channel = connection.create_channel().await.map_err(amqp_err)?;
        channel
            .queue_declare(queue, QueueDeclareOptions { durable: true, ..Default::default() }, FieldTable::default())
            .await
            .map_err(amqp_err)?;
        info!(source = %identifier, queue = %queue, "AMQP source connected");
        Ok(Self {
            identifier: identifier.to_string(),
            queue: queue.to_string(),
            channel,
            _connection: connection,
        })
    }

    fn delivery_tag(message: &RawMessage) -> Result<u64> {
        message
            .handle
            .parse()
            .map_err(|_| IngestError::Amqp(format!("invalid delivery tag {}", message.handle)))
    }
}

fn header_string(value: &AMQPValue) -> Option<String> {
    match value {
        AMQPValue::LongString(s) => Some(String::from_utf8_lossy(s.as_bytes()).into_owned()),
        AMQPValue::ShortString(s) => Some(s.as_str().to_string()),
        _ => None,
    }
}

#[async_trait]
impl BrokerSource for AmqpSource {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn poll(&self, max: u32) -> Result<Vec<RawMessage>> {
        let mut messages = Vec::new();
        while messages.len() < max.max(1) as usize {
            let Some(got) = self
                .channel
                .basic_get(&self.queue, BasicGetOptions::default())
                .await
                .map_err(amqp_err)?
            else {
                break;
            };
            let delivery = got.delivery;
            let properties = &delivery.properties;

            let attributes: HashMap<String, String> = properties
                .headers()
                .as_ref()
                .map(|table| {
                    table
                        .inner()
                        .iter()
                        .filter_map(|(k, v)| header_string(v).map(|s| (k.as_str().to_string(), s)))
                        .collect()
                })
                .unwrap_or_default();
            let id = properties
                .message_id()
                .as_ref()
                .map(|id| id.as_str().to_string())
                .unwrap_or_else(|| content_id(&delivery.data));

            messages.push(RawMessage {
                id,
                attributes,
                handle: delivery.delivery_tag.to_string(),
                body: delivery.data,
            });
        }
        Ok(messages)
    }

    async fn ack(&self, message: &RawMessage) -> Result<()> {
        self.channel
            .basic_ack(Self::delivery_tag(message)?, BasicAckOptions::default())
            .await
            .map_err(amqp_err)
    }

    async fn nack(&self, message: &RawMessage) -> Result<()> {
        self.channel
            .basic_nack(Self::delivery_tag(message)?, BasicNackOptions { requeue: true, ..Default::default() })
            .await
            .map_err(amqp_err)
    }
}
