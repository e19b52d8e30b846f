//! Redis list source
//!
//! Producers `RPUSH` payloads onto a list. The source `BLMOVE`s each payload
//! into a per-consumer processing list, so a crash between pop and enqueue
//! leaves the message recoverable; connecting again moves leftovers back.
//! Ack removes the payload from the processing list. Nack parks it in a
//! delayed set and it returns to the tail of the list after the nack delay.
//!
//! A payload may be wrapped as `{"id": .., "message_type": .., "body": {..}}`
//! to carry a message id and dispatch mode; unwrapped payloads are the
//! envelope itself.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use hr_common::MESSAGE_TYPE_HEADER;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Direction, Script};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::content_id;
use crate::{BrokerSource, RawMessage, Result};

/// Seconds a single BLMOVE blocks
const BLOCK_SECS: f64 = 1.0;
const DEFAULT_NACK_DELAY: Duration = Duration::from_secs(5);
const RELEASE_BATCH: usize = 100;

/// Moves due payloads from the delayed set to the tail of the list
const RELEASE_SCRIPT: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, tonumber(ARGV[2]))
for _, payload in ipairs(due) do
  redis.call('ZREM', KEYS[1], payload)
  redis.call('RPUSH', KEYS[2], payload)
end
return #due
"#;

pub struct RedisListSource {
    identifier: String,
    conn: ConnectionManager,
    list_key: String,
    processing_key: String,
    delayed_key: String,
    nack_delay: Duration,
    release: Script,
}

impl RedisListSource {
    pub async fn connect(identifier: &str, url: &str, list_key: &str, consumer: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        let source = Self {
            identifier: identifier.to_string(),
            conn,
            list_key: list_key.to_string(),
            processing_key: format!("{}:processing:{}", list_key, consumer),
            delayed_key: format!("{}:delayed", list_key),
            nack_delay: DEFAULT_NACK_DELAY,
            release: Script::new(RELEASE_SCRIPT),
        };
        let recovered = source.recover().await?;
        info!(
            source = %identifier,
            list_key = %list_key,
            consumer = %consumer,
            recovered,
            "Redis list source connected"
        );
        Ok(source)
    }

    pub fn with_nack_delay(mut self, delay: Duration) -> Self {
        self.nack_delay = delay;
        self
    }

    pub fn processing_key(&self) -> &str {
        &self.processing_key
    }

    /// Return messages left in the processing list by a previous run to the head of the list
    async fn recover(&self) -> Result<usize> {
        let mut conn = self.conn.clone();
        let mut recovered = 0;
        loop {
            let moved: Option<String> = conn
                .lmove(&self.processing_key, &self.list_key, Direction::Right, Direction::Left)
                .await?;
            if moved.is_none() {
                break;
            }
            recovered += 1;
        }
        if recovered > 0 {
            warn!(source = %self.identifier, recovered, "Recovered unacknowledged Redis list messages");
        }
        Ok(recovered)
    }

    async fn release_due(&self, conn: &mut ConnectionManager) -> Result<()> {
        let released: u64 = self
            .release
            .key(&self.delayed_key)
            .key(&self.list_key)
            .arg(Utc::now().timestamp_millis())
            .arg(RELEASE_BATCH)
            .invoke_async(conn)
            .await?;
        if released > 0 {
            debug!(source = %self.identifier, released, "Released nacked Redis list messages");
        }
        Ok(())
    }
}

/// Split a list payload into id, attributes and envelope body
pub(crate) fn unwrap_payload(payload: &str) -> RawMessage {
    let mut attributes = HashMap::new();
    let mut id = None;
    let mut body = payload.as_bytes().to_vec();

    if let Ok(Value::Object(mut obj)) = serde_json::from_str::<Value>(payload) {
        if let Some(Value::String(mode)) = obj.remove("message_type") {
            attributes.insert(MESSAGE_TYPE_HEADER.to_string(), mode);
        }
        if obj.contains_key("body") {
            if let Some(Value::String(msg_id)) = obj.remove("id") {
                id = Some(msg_id);
            }
        }
        match obj.remove("body") {
            Some(Value::String(inner)) => body = inner.into_bytes(),
            Some(inner) => body = inner.to_string().into_bytes(),
            None if !attributes.is_empty() => body = Value::Object(obj).to_string().into_bytes(),
            None => {}
        }
    }

    RawMessage {
        id: id.unwrap_or_else(|| content_id(payload.as_bytes())),
        body,
        attributes,
        handle: payload.to_string(),
    }
}

#[async_trait]
impl BrokerSource for RedisListSource {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn poll(&self, max: u32) -> Result<Vec<RawMessage>> {
        let mut conn = self.conn.clone();
        self.release_due(&mut conn).await?;

        let mut messages = Vec::new();
        let first: Option<String> = conn
            .blmove(&self.list_key, &self.processing_key, Direction::Left, Direction::Right, BLOCK_SECS)
            .await?;
        let Some(payload) = first else {
            return Ok(messages);
        };
        messages.push(unwrap_payload(&payload));

        while messages.len() < max.max(1) as usize {
            let next: Option<String> = conn
                .lmove(&self.list_key, &self.processing_key, Direction::Left, Direction::Right)
                .await?;
            match next {
                Some(payload) => messages.push(unwrap_payload(&payload)),
                None => break,
            }
        }
        Ok(messages)
    }

    async fn ack(&self, message: &RawMessage) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.lrem(&self.processing_key, 1, &message.handle).await?;
        Ok(())
    }

    async fn nack(&self, message: &RawMessage) -> Result<()> {
        let mut conn = self.conn.clone();
        let due = Utc::now().timestamp_millis() + self.nack_delay.as_millis().min(i64::MAX as u128) as i64;
        let _: () = redis::pipe()
            .atomic()
            .lrem(&self.processing_key, 1, &message.handle)
            .ignore()
            .zadd(&self.delayed_key, &message.handle, due)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}
