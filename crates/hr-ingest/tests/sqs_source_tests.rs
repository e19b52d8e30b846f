//! SQS source against LocalStack in a container.
//!
//! Skipped with a message when no container runtime is available.

#![cfg(feature = "sqs")]

use std::time::Duration;

use aws_config::BehaviorVersion;
use aws_sdk_sqs::config::{Credentials, Region};
use aws_sdk_sqs::types::{MessageAttributeValue, QueueAttributeName};
use aws_sdk_sqs::Client;
use hr_common::MESSAGE_TYPE_HEADER;
use hr_ingest::sources::sqs::SqsSource;
use hr_ingest::BrokerSource;
use testcontainers::core::IntoContainerPort;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::localstack::LocalStack;

async fn sqs() -> Option<(ContainerAsync<LocalStack>, Client, String)> {
    let container = match LocalStack::default().with_env_var("SERVICES", "sqs").start().await {
        Ok(c) => c,
        Err(e) => {
            eprintln!("skipping: cannot start localstack container: {}", e);
            return None;
        }
    };
    let host = container.get_host().await.ok()?;
    let port = container.get_host_port_ipv4(4566.tcp()).await.ok()?;
    let config = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new("us-east-1"))
        .credentials_provider(Credentials::new("test", "test", None, None, "static"))
        .endpoint_url(format!("http://{}:{}", host, port))
        .load()
        .await;
    let client = Client::new(&config);
    // Short visibility so an unsettled message would show up again within the test
    let created = client
        .create_queue()
        .queue_name("hookrelay-ingest")
        .attributes(QueueAttributeName::VisibilityTimeout, "1")
        .send()
        .await
        .ok()?;
    let queue_url = created.queue_url()?.to_string();
    Some((container, client, queue_url))
}

async fn send(client: &Client, queue_url: &str, body: &str) -> String {
    let attribute = MessageAttributeValue::builder()
        .data_type("String")
        .string_value("fanout")
        .build()
        .unwrap();
    let sent = client
        .send_message()
        .queue_url(queue_url)
        .message_body(body)
        .message_attributes(MESSAGE_TYPE_HEADER, attribute)
        .send()
        .await
        .unwrap();
    sent.message_id().unwrap().to_string()
}

#[tokio::test]
async fn test_receive_carries_string_attributes() {
    let Some((_container, client, queue_url)) = sqs().await else { return };
    let id = send(&client, &queue_url, r#"{"owner_id":"o1","event_type":"a"}"#).await;

    let source = SqsSource::with_client("orders", client, &queue_url, 1);
    let messages = source.poll(10).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, id);
    assert_eq!(messages[0].attribute(MESSAGE_TYPE_HEADER), Some("fanout"));
    assert_eq!(messages[0].body, br#"{"owner_id":"o1","event_type":"a"}"#.to_vec());
}

#[tokio::test]
async fn test_ack_deletes_message() {
    let Some((_container, client, queue_url)) = sqs().await else { return };
    send(&client, &queue_url, r#"{"event_type":"a"}"#).await;

    let source = SqsSource::with_client("orders", client, &queue_url, 1);
    let messages = source.poll(1).await.unwrap();
    source.ack(&messages[0]).await.unwrap();

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(source.poll(1).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_nack_makes_message_visible_again() {
    let Some((_container, client, queue_url)) = sqs().await else { return };
    let id = send(&client, &queue_url, r#"{"event_type":"a"}"#).await;

    let source = SqsSource::with_client("orders", client, &queue_url, 1);
    let first = source.poll(1).await.unwrap();
    source.nack(&first[0]).await.unwrap();

    let again = source.poll(1).await.unwrap();
    assert_eq!(again.len(), 1);
    assert_eq!(again[0].id, id);
    assert_ne!(again[0].handle, first[0].handle);
}
