//! Webhook delivery tests against a mock HTTP server.

use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::orchestrator::test_helpers::*;
use crate::store::MemoryStore;
use crate::types::{Event, JobOptions, JobStatus, Tier, WebhookPayload};

const URL: &str = "https://media.example.com/watch?v=webhook";

fn options_with_webhook(server: &MockServer) -> JobOptions {
    JobOptions {
        webhook_url: Some(format!("{}/notify", server.uri())),
        ..Default::default()
    }
}

#[tokio::test]
async fn webhook_fires_once_on_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/notify"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(MockEngine::new());
    let node = build_node(test_config("node-1"), store, engine);
    let _dispatcher = node.start_dispatcher();

    let id = node
        .submit(URL, options_with_webhook(&server), Tier::Standard)
        .await
        .unwrap();
    wait_for_status(&node, id, JobStatus::Success, Duration::from_secs(5)).await;

    // Delivery is fire-and-forget; give it a moment to land
    tokio::time::sleep(Duration::from_millis(200)).await;

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);

    let payload: WebhookPayload = requests[0].body_json().unwrap();
    assert_eq!(payload.job_id, id);
    assert_eq!(payload.status, JobStatus::Success);
    assert!(payload.result.is_some());
    assert!(payload.error.is_none());
}

#[tokio::test]
async fn webhook_carries_error_on_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/notify"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(MockEngine::new());
    engine.push(ScriptedFetch::Permanent("media removed"));

    let node = build_node(test_config("node-1"), store, engine);
    let _dispatcher = node.start_dispatcher();

    let id = node
        .submit(URL, options_with_webhook(&server), Tier::Standard)
        .await
        .unwrap();
    wait_for_status(&node, id, JobStatus::Failed, Duration::from_secs(5)).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);

    let payload: WebhookPayload = requests[0].body_json().unwrap();
    assert_eq!(payload.status, JobStatus::Failed);
    let error = payload.error.unwrap();
    assert_eq!(error.code, crate::error::ErrorCode::Permanent);
    assert!(error.message.contains("media removed"));
}

#[tokio::test]
async fn failing_webhook_retries_then_reports() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/notify"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(MockEngine::new());
    let node = build_node(test_config("node-1"), store, engine);
    let mut events = node.subscribe();
    let _dispatcher = node.start_dispatcher();

    let id = node
        .submit(URL, options_with_webhook(&server), Tier::Standard)
        .await
        .unwrap();
    wait_for_status(&node, id, JobStatus::Success, Duration::from_secs(5)).await;

    // Three attempts at 10ms spacing, then the failure event
    tokio::time::sleep(Duration::from_millis(500)).await;

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 3, "bounded retries, not infinite");

    let mut webhook_failed = false;
    while let Ok(event) = events.try_recv() {
        if let Event::WebhookFailed { error, .. } = event {
            assert!(error.contains("500"));
            webhook_failed = true;
        }
    }
    assert!(webhook_failed, "exhausted delivery must surface a WebhookFailed event");
}

#[tokio::test]
async fn jobs_without_webhook_send_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(MockEngine::new());
    let node = build_node(test_config("node-1"), store, engine);
    let _dispatcher = node.start_dispatcher();

    let id = node
        .submit(URL, JobOptions::default(), Tier::Standard)
        .await
        .unwrap();
    wait_for_status(&node, id, JobStatus::Success, Duration::from_secs(5)).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(server.received_requests().await.unwrap().is_empty());
}
