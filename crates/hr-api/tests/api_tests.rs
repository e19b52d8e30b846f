//! API Endpoint Tests
//!
//! Tests for:
//! - Trigger endpoints and their validation responses
//! - Replay and snapshot sync
//! - Health checks

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use hr_api::{create_router, AppState};
use hr_common::{CreateEventRequest, DispatchMode, QueueName};
use hr_platform::{Endpoint, Event, EventService, InMemoryStore, Project, Repositories, Subscription, SubscriptionSnapshot};
use hr_queue::{job_id, MemoryTaskQueue, TaskQueue};
use serde_json::{json, Value};

const PROJECT: &str = "p1";

struct TestApp {
    app: axum::Router,
    store: Arc<InMemoryStore>,
    repos: Repositories,
    queue: Arc<MemoryTaskQueue>,
}

fn create_test_app() -> TestApp {
    let (repos, store) = Repositories::in_memory();
    store.insert_project(Project::new(PROJECT, "org1", "Project 1"));
    store.insert_endpoint(Endpoint::new(PROJECT, "billing", "http://localhost/hook").with_id("e1"));

    let queue = Arc::new(MemoryTaskQueue::default());
    let snapshot = Arc::new(SubscriptionSnapshot::new(repos.clone()));
    let service = Arc::new(EventService::new(repos.clone(), queue.clone(), snapshot));

    let app = create_router(AppState {
        service,
        queue: queue.clone(),
        metrics: None,
    });
    TestApp { app, store, repos, queue }
}

async fn send(app: &axum::Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

// ============================================================================
// Trigger Endpoint Tests
// ============================================================================

#[tokio::test]
async fn test_create_single_event_accepted() {
    let t = create_test_app();

    let (status, body) = send(
        &t.app,
        Method::POST,
        "/api/v1/projects/p1/events",
        Some(json!({"endpoint_id": "e1", "event_type": "invoice.paid", "data": {"amount": 10}})),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    let event_id = body["event_id"].as_str().unwrap();
    assert_eq!(body["job_id"], job_id(DispatchMode::Single, PROJECT, event_id));
    assert_eq!(t.queue.ready_ids(QueueName::CreateEvent).len(), 1);

    let job = t.queue.dequeue(QueueName::CreateEvent).await.unwrap().unwrap();
    let req: CreateEventRequest = serde_json::from_value(job.payload).unwrap();
    assert_eq!(req.endpoint_id.as_deref(), Some("e1"));
    assert_eq!(req.mode, DispatchMode::Single);
}

#[tokio::test]
async fn test_unknown_endpoint_rejected() {
    let t = create_test_app();

    let (status, body) = send(
        &t.app,
        Method::POST,
        "/api/v1/projects/p1/events",
        Some(json!({"endpoint_id": "missing", "event_type": "a", "data": {}})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "VALIDATION_ERROR");
    assert!(t.queue.is_empty());
}

#[tokio::test]
async fn test_fanout_requires_owner() {
    let t = create_test_app();

    let (status, _) = send(
        &t.app,
        Method::POST,
        "/api/v1/projects/p1/events/fanout",
        Some(json!({"event_type": "a", "data": {}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &t.app,
        Method::POST,
        "/api/v1/projects/p1/events/fanout",
        Some(json!({"owner_id": "o1", "event_type": "a", "data": {}})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(body["job_id"].as_str().unwrap().starts_with("fanout:p1:"));
}

#[tokio::test]
async fn test_broadcast_and_dynamic_accepted() {
    let t = create_test_app();

    let (status, body) = send(
        &t.app,
        Method::POST,
        "/api/v1/projects/p1/events/broadcast",
        Some(json!({"event_type": "user.created", "data": {}})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(body["job_id"].as_str().unwrap().starts_with("broadcast:p1:"));

    let (status, body) = send(
        &t.app,
        Method::POST,
        "/api/v1/projects/p1/events/dynamic",
        Some(json!({"url": "https://example.com/hook", "event_type": "user.created", "data": {}})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(body["job_id"].as_str().unwrap().starts_with("dynamic:p1:"));
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let t = create_test_app();

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/projects/p1/events")
        .header("content-type", "application/json")
        .body(Body::from("{\"event_type\":"))
        .unwrap();
    let response = t.app.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(t.queue.is_empty());
}

#[tokio::test]
async fn test_unknown_project_rejected() {
    let t = create_test_app();

    let (status, _) = send(
        &t.app,
        Method::POST,
        "/api/v1/projects/nope/events/broadcast",
        Some(json!({"event_type": "a", "data": {}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ============================================================================
// Replay & Sync Tests
// ============================================================================

#[tokio::test]
async fn test_replay_unknown_event_not_found() {
    let t = create_test_app();

    let (status, body) = send(&t.app, Method::POST, "/api/v1/projects/p1/events/ghost/replay", None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "NOT_FOUND");
}

#[tokio::test]
async fn test_replay_existing_event() {
    let t = create_test_app();
    let event = Event::from_request(&CreateEventRequest {
        event_id: "evt-1".into(),
        project_id: PROJECT.into(),
        mode: DispatchMode::Single,
        event_type: "invoice.paid".into(),
        data: json!({}),
        endpoint_id: Some("e1".into()),
        owner_id: None,
        source_id: None,
        idempotency_key: None,
        custom_headers: Default::default(),
        dynamic: None,
        accepted_at: chrono::Utc::now(),
    });
    let event_id = event.id.clone();
    t.repos.events.create_event(&event).await.unwrap();

    let (status, body) =
        send(&t.app, Method::POST, &format!("/api/v1/projects/p1/events/{}/replay", event_id), None).await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["event_id"], event_id.as_str());
    assert_eq!(body["job_id"], job_id(DispatchMode::Replay, PROJECT, &event_id));
}

#[tokio::test]
async fn test_sync_bumps_snapshot_version() {
    let t = create_test_app();
    t.store.insert_subscription(Subscription::new(PROJECT, "e1", "all"));

    let (status, first) = send(&t.app, Method::POST, "/api/v1/projects/p1/subscriptions/sync", None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, second) = send(&t.app, Method::POST, "/api/v1/projects/p1/subscriptions/sync", None).await;

    assert!(second["version"].as_u64().unwrap() > first["version"].as_u64().unwrap());
}

// ============================================================================
// Health Endpoint Tests
// ============================================================================

#[tokio::test]
async fn test_health_endpoints() {
    let t = create_test_app();

    let (status, body) = send(&t.app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "UP");
    assert!(body["version"].is_string());

    let (_, body) = send(&t.app, Method::GET, "/health/live", None).await;
    assert_eq!(body["status"], "LIVE");

    let (status, body) = send(&t.app, Method::GET, "/health/ready", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "READY");
}

#[tokio::test]
async fn test_metrics_without_recorder_is_empty() {
    let t = create_test_app();

    let response = t
        .app
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert!(bytes.is_empty());
}
