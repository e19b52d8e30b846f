//! Broker transports

#[cfg(feature = "amqp")]
pub mod amqp;
pub mod pubsub;
pub mod redis_list;
#[cfg(feature = "sqs")]
pub mod sqs;

use std::sync::Arc;

use hr_config::{BrokerConfig, SourceConfig};
use uuid::Uuid;

use crate::{BrokerSource, Result};

/// Namespace for ids of messages whose broker assigns none
const CONTENT_ID_NAMESPACE: Uuid = Uuid::from_u128(0x2b7e_11d0_4c6a_4f58_9e03_a1d4_7c52_e6b9);

/// Stable id for a message body, used when the transport carries no message id
pub(crate) fn content_id(body: &[u8]) -> String {
    Uuid::new_v5(&CONTENT_ID_NAMESPACE, body).to_string()
}

/// Connect the transport described by `config`
pub async fn build_source(config: &SourceConfig) -> Result<Arc<dyn BrokerSource>> {
    match &config.broker {
        #[cfg(feature = "sqs")]
        BrokerConfig::Sqs { queue_url, endpoint_url, wait_time_seconds } => {
            let source = sqs::SqsSource::connect(&config.id, queue_url, endpoint_url.as_deref(), *wait_time_seconds).await;
            Ok(Arc::new(source))
        }
        #[cfg(not(feature = "sqs"))]
        BrokerConfig::Sqs { .. } => Err(crate::IngestError::Config(format!(
            "source {} uses SQS but hr-ingest was built without the sqs feature",
            config.id
        ))),
        BrokerConfig::Pubsub { project, subscription, endpoint, access_token } => Ok(Arc::new(
            pubsub::PubSubSource::new(&config.id, endpoint, project, subscription, access_token.clone())?,
        )),
        #[cfg(feature = "amqp")]
        BrokerConfig::Amqp { uri, queue } => Ok(Arc::new(amqp::AmqpSource::connect(&config.id, uri, queue).await?)),
        #[cfg(not(feature = "amqp"))]
        BrokerConfig::Amqp { .. } => Err(crate::IngestError::Config(format!(
            "source {} uses AMQP but hr-ingest was built without the amqp feature",
            config.id
        ))),
        BrokerConfig::Redis { url, list_key, consumer } => {
            let consumer = consumer.as_deref().unwrap_or(&config.id);
            Ok(Arc::new(redis_list::RedisListSource::connect(&config.id, url, list_key, consumer).await?))
        }
    }
}
