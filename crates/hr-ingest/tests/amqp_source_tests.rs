//! AMQP source against RabbitMQ in a container.
//!
//! Skipped with a message when no container runtime is available.

#![cfg(feature = "amqp")]

use std::time::Duration;

use hr_common::MESSAGE_TYPE_HEADER;
use hr_ingest::sources::amqp::AmqpSource;
use hr_ingest::{BrokerSource, RawMessage};
use lapin::options::BasicPublishOptions;
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use testcontainers::core::IntoContainerPort;
use testcontainers::runners::AsyncRunner;
use testcontainers::ContainerAsync;
use testcontainers_modules::rabbitmq::RabbitMq;

const QUEUE: &str = "hookrelay.ingest";

async fn rabbit() -> Option<(ContainerAsync<RabbitMq>, String)> {
    let container = match RabbitMq::default().start().await {
        Ok(c) => c,
        Err(e) => {
            eprintln!("skipping: cannot start rabbitmq container: {}", e);
            return None;
        }
    };
    let host = container.get_host().await.ok()?;
    let port = container.get_host_port_ipv4(5672.tcp()).await.ok()?;
    Some((container, format!("amqp://guest:guest@{}:{}/%2f", host, port)))
}

async fn publisher(uri: &str) -> (Connection, Channel) {
    let connection = Connection::connect(uri, ConnectionProperties::default()).await.unwrap();
    let channel = connection.create_channel().await.unwrap();
    (connection, channel)
}

async fn publish(channel: &Channel, body: &[u8], properties: BasicProperties) {
    channel
        .basic_publish("", QUEUE, BasicPublishOptions::default(), body, properties)
        .await
        .unwrap()
        .await
        .unwrap();
}

/// Publishing is asynchronous on the broker side, so give it a moment
async fn poll_until_some(source: &AmqpSource) -> Vec<RawMessage> {
    for _ in 0..50 {
        let messages = source.poll(10).await.unwrap();
        if !messages.is_empty() {
            return messages;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    Vec::new()
}

#[tokio::test]
async fn test_poll_reads_message_id_and_headers() {
    let Some((_container, uri)) = rabbit().await else { return };
    let source = AmqpSource::connect("orders", &uri, QUEUE).await.unwrap();
    let (_conn, channel) = publisher(&uri).await;

    let mut headers = FieldTable::default();
    headers.insert(MESSAGE_TYPE_HEADER.into(), AMQPValue::LongString("fanout".into()));
    headers.insert("x-retries".into(), AMQPValue::LongInt(3));
    let properties = BasicProperties::default().with_message_id("m-1".into()).with_headers(headers);
    publish(&channel, br#"{"event_type":"a"}"#, properties).await;

    let messages = poll_until_some(&source).await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, "m-1");
    assert_eq!(messages[0].attribute(MESSAGE_TYPE_HEADER), Some("fanout"));
    // Only string headers become attributes
    assert_eq!(messages[0].attribute("x-retries"), None);

    source.ack(&messages[0]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(source.poll(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_nack_requeues_with_stable_content_id() {
    let Some((_container, uri)) = rabbit().await else { return };
    let source = AmqpSource::connect("orders", &uri, QUEUE).await.unwrap();
    let (_conn, channel) = publisher(&uri).await;
    publish(&channel, br#"{"event_type":"a"}"#, BasicProperties::default()).await;

    let first = poll_until_some(&source).await;
    assert_eq!(first.len(), 1);
    source.nack(&first[0]).await.unwrap();

    let again = poll_until_some(&source).await;
    assert_eq!(again.len(), 1);
    // No message id on the wire, so the id is derived from the body
    assert_eq!(again[0].id, first[0].id);
    source.ack(&again[0]).await.unwrap();
}
