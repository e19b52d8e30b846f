//! Broker ingestion: normalizer + event service + settle semantics

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hr_common::{broker_event_id, DispatchMode, QueueName};
use hr_ingest::sources::pubsub::PubSubSource;
use hr_ingest::{BrokerSource, MessageOutcome, Normalizer, RawMessage, Rejection, SourceRunner};
use hr_platform::{Endpoint, EventService, Project, Repositories, SubscriptionSnapshot};
use hr_queue::{job_id, MemoryTaskQueue};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PROJECT: &str = "p1";
const SOURCE: &str = "orders-queue";

#[derive(Default)]
struct ScriptedSource {
    pending: Mutex<VecDeque<RawMessage>>,
    acked: Mutex<Vec<String>>,
    nacked: Mutex<Vec<String>>,
}

impl ScriptedSource {
    fn push(&self, id: &str, body: serde_json::Value, mode: Option<&str>) {
        let mut attributes = HashMap::new();
        if let Some(mode) = mode {
            attributes.insert("x-convoy-message-type".to_string(), mode.to_string());
        }
        self.pending.lock().unwrap().push_back(RawMessage {
            id: id.to_string(),
            body: serde_json::to_vec(&body).unwrap(),
            attributes,
            handle: format!("handle-{}", id),
        });
    }

    fn acked(&self) -> Vec<String> {
        self.acked.lock().unwrap().clone()
    }
}

#[async_trait]
impl BrokerSource for ScriptedSource {
    fn identifier(&self) -> &str {
        SOURCE
    }

    async fn poll(&self, max: u32) -> hr_ingest::Result<Vec<RawMessage>> {
        let mut pending = self.pending.lock().unwrap();
        let n = pending.len().min(max as usize);
        Ok(pending.drain(..n).collect())
    }

    async fn ack(&self, message: &RawMessage) -> hr_ingest::Result<()> {
        self.acked.lock().unwrap().push(message.id.clone());
        Ok(())
    }

    async fn nack(&self, message: &RawMessage) -> hr_ingest::Result<()> {
        self.nacked.lock().unwrap().push(message.id.clone());
        Ok(())
    }
}

fn setup() -> (Arc<ScriptedSource>, SourceRunner, Arc<MemoryTaskQueue>) {
    let (repos, store) = Repositories::in_memory();
    store.insert_project(Project::new(PROJECT, "org1", "Project 1"));
    store.insert_endpoint(Endpoint::new(PROJECT, "orders", "http://localhost/hook").with_id("e1"));

    let queue = Arc::new(MemoryTaskQueue::default());
    let snapshot = Arc::new(SubscriptionSnapshot::new(repos.clone()));
    let service = Arc::new(EventService::new(repos, queue.clone(), snapshot));

    let source = Arc::new(ScriptedSource::default());
    let runner = SourceRunner::new(source.clone(), Normalizer::new(SOURCE, PROJECT), service).with_workers(1, 10);
    (source, runner, queue)
}

#[tokio::test]
async fn test_valid_message_enqueued_and_acked() {
    let (source, runner, queue) = setup();
    source.push("m1", json!({"endpoint_id": "e1", "event_type": "order.created", "data": {"id": 1}}), None);

    assert_eq!(runner.poll_once().await.unwrap(), 1);

    let expected = job_id(DispatchMode::Single, PROJECT, &broker_event_id(SOURCE, "m1"));
    assert_eq!(queue.ready_ids(QueueName::CreateEvent), vec![expected]);
    assert_eq!(source.acked(), vec!["m1"]);
}

#[tokio::test]
async fn test_redelivered_message_is_duplicate() {
    let (source, runner, queue) = setup();
    let body = json!({"endpoint_id": "e1", "event_type": "order.created", "data": {}});
    source.push("m1", body.clone(), None);
    source.push("m1", body, None);

    let first = run_one(&runner, &source).await;
    let second = run_one(&runner, &source).await;

    assert_eq!(first, MessageOutcome::Accepted);
    assert_eq!(second, MessageOutcome::Duplicate);
    assert_eq!(queue.ready_ids(QueueName::CreateEvent).len(), 1);
    assert_eq!(source.acked(), vec!["m1", "m1"]);
}

#[tokio::test]
async fn test_fanout_mode_from_attribute() {
    let (source, runner, queue) = setup();
    source.push("m2", json!({"owner_id": "o1", "event_type": "a", "data": {}}), Some("fanout"));

    runner.poll_once().await.unwrap();

    let expected = job_id(DispatchMode::Fanout, PROJECT, &broker_event_id(SOURCE, "m2"));
    assert_eq!(queue.ready_ids(QueueName::CreateEvent), vec![expected]);
}

#[tokio::test]
async fn test_rejections_are_acked_without_jobs() {
    let (source, runner, queue) = setup();
    source.push("unknown-endpoint", json!({"endpoint_id": "nope", "event_type": "a", "data": {}}), None);
    source.push("dynamic", json!({"event_type": "a", "data": {}}), Some("dynamic"));
    source.push("no-owner", json!({"event_type": "a", "data": {}}), Some("fanout"));

    let mut outcomes = Vec::new();
    for _ in 0..3 {
        outcomes.push(run_one(&runner, &source).await);
    }

    assert!(matches!(outcomes[0], MessageOutcome::Rejected(Rejection::Validation(_))));
    assert_eq!(outcomes[1], MessageOutcome::Rejected(Rejection::UnsupportedMode("dynamic".into())));
    assert!(matches!(outcomes[2], MessageOutcome::Rejected(Rejection::Validation(_))));
    assert!(queue.is_empty());
    assert_eq!(source.acked().len(), 3);
    assert!(source.nacked.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_malformed_body_rejected() {
    let (source, runner, queue) = setup();
    source.pending.lock().unwrap().push_back(RawMessage {
        id: "bad".into(),
        body: b"{\"endpoint_id\":".to_vec(),
        attributes: HashMap::new(),
        handle: "h".into(),
    });

    let outcome = run_one(&runner, &source).await;
    assert!(matches!(outcome, MessageOutcome::Rejected(Rejection::MalformedJson(_))));
    assert!(queue.is_empty());
}

/// Pull one message from the scripted source and handle it
async fn run_one(runner: &SourceRunner, source: &ScriptedSource) -> MessageOutcome {
    let msg = source.poll(1).await.unwrap().remove(0);
    runner.handle_message(&msg).await
}

// ---------------------------------------------------------------------------
// Pub/Sub REST transport
// ---------------------------------------------------------------------------

const SUB_PATH: &str = "/v1/projects/gcp-proj/subscriptions/hooks";

fn pubsub(server: &MockServer, token: Option<&str>) -> PubSubSource {
    PubSubSource::new("pubsub-src", &server.uri(), "gcp-proj", "hooks", token.map(String::from)).unwrap()
}

#[tokio::test]
async fn test_pubsub_pull_decodes_messages() {
    let server = MockServer::start().await;
    let data = STANDARD.encode(br#"{"endpoint_id":"e1","event_type":"a"}"#);
    Mock::given(method("POST"))
        .and(path(format!("{}:pull", SUB_PATH)))
        .and(header("authorization", "Bearer tok"))
        .and(body_json(json!({"maxMessages": 5})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "receivedMessages": [{
                "ackId": "ack-1",
                "message": {
                    "data": data,
                    "attributes": {"x-convoy-message-type": "broadcast"},
                    "messageId": "1001",
                    "publishTime": "2024-01-01T00:00:00Z"
                }
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let messages = pubsub(&server, Some("tok")).poll(5).await.unwrap();

    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, "1001");
    assert_eq!(messages[0].handle, "ack-1");
    assert_eq!(messages[0].attribute("X-Convoy-Message-Type"), Some("broadcast"));
    assert_eq!(messages[0].body, br#"{"endpoint_id":"e1","event_type":"a"}"#);
}

#[tokio::test]
async fn test_pubsub_empty_pull() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{}:pull", SUB_PATH)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    assert!(pubsub(&server, None).poll(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_pubsub_ack_and_nack() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{}:acknowledge", SUB_PATH)))
        .and(body_json(json!({"ackIds": ["ack-1"]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{}:modifyAckDeadline", SUB_PATH)))
        .and(body_json(json!({"ackIds": ["ack-2"], "ackDeadlineSeconds": 0})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let source = pubsub(&server, None);
    let msg = |handle: &str| RawMessage {
        id: "x".into(),
        body: Vec::new(),
        attributes: HashMap::new(),
        handle: handle.into(),
    };
    source.ack(&msg("ack-1")).await.unwrap();
    source.nack(&msg("ack-2")).await.unwrap();
}

#[tokio::test]
async fn test_pubsub_error_status_surfaces() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{}:pull", SUB_PATH)))
        .respond_with(ResponseTemplate::new(403).set_body_string("permission denied"))
        .mount(&server)
        .await;

    let err = pubsub(&server, None).poll(1).await.unwrap_err();
    assert!(err.to_string().contains("403"));
}
