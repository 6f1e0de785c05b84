//! End-to-end lifecycle tests: submission, admission, dispatch, retry
//! policy, and stale-update rejection.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, ErrorCode};
use crate::orchestrator::test_helpers::*;
use crate::store::{MemoryStore, StateStore, keys};
use crate::types::{JobOptions, JobStatus, Tier};

const URL: &str = "https://media.example.com/watch?v=abc123";

#[tokio::test]
async fn submitted_job_runs_to_success() {
    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(MockEngine::new());
    let node = build_node(test_config("node-1"), store, engine.clone());
    let _dispatcher = node.start_dispatcher();

    let id = node
        .submit(URL, JobOptions::default(), Tier::Standard)
        .await
        .unwrap();

    let job = wait_for_status(&node, id, JobStatus::Success, Duration::from_secs(5)).await;

    assert_eq!(job.progress, Some(100.0));
    assert_eq!(job.owner_node, None, "terminal jobs carry no owner");
    assert!(job.started_at.is_some());
    assert!(job.completed_at.is_some());
    assert_eq!(job.retry_count, 0);
    assert_eq!(
        job.result.unwrap()["filename"].as_str(),
        Some("video.mp4")
    );
    assert_eq!(engine.fetch_count(), 1);
}

#[tokio::test]
async fn submission_over_ceiling_is_rejected_with_limit() {
    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(MockEngine::new());
    let mut config = test_config("node-1");
    config.admission.standard_limit = 3;
    // No dispatcher: all three jobs stay pending and occupy their slots
    let node = build_node(config, store, engine);

    for _ in 0..3 {
        node.submit(URL, JobOptions::default(), Tier::Standard)
            .await
            .unwrap();
    }

    let err = node
        .submit(URL, JobOptions::default(), Tier::Standard)
        .await
        .unwrap_err();
    match err {
        Error::AdmissionRejected { tier, limit } => {
            assert_eq!(tier, Tier::Standard);
            assert_eq!(limit, 3);
        }
        other => panic!("expected AdmissionRejected, got {other:?}"),
    }

    // Elevated tier has its own ceiling and is unaffected
    node.submit(URL, JobOptions::default(), Tier::Elevated)
        .await
        .unwrap();
}

#[tokio::test]
async fn completed_job_releases_admission_slot() {
    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(MockEngine::new());
    let mut config = test_config("node-1");
    config.admission.standard_limit = 1;
    let node = build_node(config, store, engine);
    let _dispatcher = node.start_dispatcher();

    let id = node
        .submit(URL, JobOptions::default(), Tier::Standard)
        .await
        .unwrap();
    wait_for_status(&node, id, JobStatus::Success, Duration::from_secs(5)).await;

    // Slot freed: the next submission is admitted
    node.submit(URL, JobOptions::default(), Tier::Standard)
        .await
        .unwrap();
}

#[tokio::test]
async fn transient_failures_retry_then_succeed() {
    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(MockEngine::new());
    engine.push(ScriptedFetch::Transient("connection reset"));
    engine.push(ScriptedFetch::Transient("connection reset"));
    engine.push(ScriptedFetch::Success(serde_json::json!({"ok": true})));

    let node = build_node(test_config("node-1"), store, engine.clone());
    let _dispatcher = node.start_dispatcher();

    let id = node
        .submit(URL, JobOptions::default(), Tier::Standard)
        .await
        .unwrap();

    let job = wait_for_status(&node, id, JobStatus::Success, Duration::from_secs(5)).await;
    assert_eq!(job.retry_count, 2, "two transient failures consumed two retries");
    assert_eq!(engine.fetch_count(), 3);
    assert!(job.error.is_none());
}

#[tokio::test]
async fn permanent_failure_fails_immediately_without_retry() {
    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(MockEngine::new());
    engine.push(ScriptedFetch::Permanent("media removed by uploader"));

    let node = build_node(test_config("node-1"), store, engine.clone());
    let _dispatcher = node.start_dispatcher();

    let id = node
        .submit(URL, JobOptions::default(), Tier::Standard)
        .await
        .unwrap();

    let job = wait_for_status(&node, id, JobStatus::Failed, Duration::from_secs(5)).await;
    let error = job.error.unwrap();
    assert_eq!(error.code, ErrorCode::Permanent);
    assert!(error.message.contains("media removed"));
    assert_eq!(job.retry_count, 0);
    assert_eq!(engine.fetch_count(), 1, "permanent errors must not re-dispatch");
}

#[tokio::test]
async fn exhausted_retries_fail_with_retries_exhausted() {
    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(MockEngine::new());
    for _ in 0..4 {
        engine.push(ScriptedFetch::Transient("flaky upstream"));
    }

    let node = build_node(test_config("node-1"), store, engine.clone());
    let _dispatcher = node.start_dispatcher();

    let id = node
        .submit(URL, JobOptions::default(), Tier::Standard)
        .await
        .unwrap();

    let job = wait_for_status(&node, id, JobStatus::Failed, Duration::from_secs(5)).await;
    assert_eq!(job.retry_count, 3);
    assert_eq!(job.error.unwrap().code, ErrorCode::RetriesExhausted);
    assert_eq!(engine.fetch_count(), 4, "initial attempt plus three retries");
}

#[tokio::test]
async fn resource_exhausted_fails_without_retry_and_raises_alert() {
    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(MockEngine::new());
    engine.push(ScriptedFetch::ResourceExhausted("no space left on device"));

    let node = build_node(test_config("node-1"), store, engine.clone());
    let mut events = node.subscribe();
    let _dispatcher = node.start_dispatcher();

    let id = node
        .submit(URL, JobOptions::default(), Tier::Standard)
        .await
        .unwrap();

    let job = wait_for_status(&node, id, JobStatus::Failed, Duration::from_secs(5)).await;
    assert_eq!(job.error.unwrap().code, ErrorCode::ResourceExhausted);
    assert_eq!(engine.fetch_count(), 1);

    let mut saw_critical_alert = false;
    while let Ok(event) = events.try_recv() {
        if let crate::types::Event::AlertRaised { alert } = event
            && alert.severity == crate::types::Severity::Critical
            && alert.metric == "job_resource_exhausted"
        {
            saw_critical_alert = true;
        }
    }
    assert!(saw_critical_alert, "resource exhaustion must raise a critical alert");
}

#[tokio::test]
async fn wall_clock_ceiling_fails_with_timeout() {
    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(MockEngine::new());
    engine.push(ScriptedFetch::HangIgnoringCancel);

    let mut config = test_config("node-1");
    config.execution.job_timeout = Duration::from_millis(200);
    let node = build_node(config, store, engine);
    let _dispatcher = node.start_dispatcher();

    let id = node
        .submit(URL, JobOptions::default(), Tier::Standard)
        .await
        .unwrap();

    let job = wait_for_status(&node, id, JobStatus::Failed, Duration::from_secs(5)).await;
    assert_eq!(job.error.unwrap().code, ErrorCode::Timeout);
}

#[tokio::test]
async fn manual_retry_of_failed_job_runs_again() {
    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(MockEngine::new());
    engine.push(ScriptedFetch::Permanent("first attempt rejected"));

    let node = build_node(test_config("node-1"), store, engine.clone());
    let _dispatcher = node.start_dispatcher();

    let id = node
        .submit(URL, JobOptions::default(), Tier::Standard)
        .await
        .unwrap();
    wait_for_status(&node, id, JobStatus::Failed, Duration::from_secs(5)).await;

    let retried = node.retry(id).await.unwrap();
    assert_eq!(retried.status, JobStatus::Retrying);
    assert_eq!(retried.retry_count, 1);
    assert!(retried.error.is_none(), "retry clears the recorded error");

    let job = wait_for_status(&node, id, JobStatus::Success, Duration::from_secs(5)).await;
    assert_eq!(job.retry_count, 1);
}

#[tokio::test]
async fn retry_rejected_for_non_failed_jobs() {
    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(MockEngine::new());
    let node = build_node(test_config("node-1"), store, engine);
    // No dispatcher: job stays pending

    let id = node
        .submit(URL, JobOptions::default(), Tier::Standard)
        .await
        .unwrap();

    let err = node.retry(id).await.unwrap_err();
    assert!(
        matches!(err, Error::InvalidState { .. }),
        "retry of a pending job must be rejected, got {err:?}"
    );
}

#[tokio::test]
async fn retry_rejected_when_budget_consumed() {
    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(MockEngine::new());
    for _ in 0..4 {
        engine.push(ScriptedFetch::Transient("flaky"));
    }
    let node = build_node(test_config("node-1"), store, engine);
    let _dispatcher = node.start_dispatcher();

    let id = node
        .submit(URL, JobOptions::default(), Tier::Standard)
        .await
        .unwrap();
    let job = wait_for_status(&node, id, JobStatus::Failed, Duration::from_secs(5)).await;
    assert_eq!(job.retry_count, 3);

    let err = node.retry(id).await.unwrap_err();
    assert!(matches!(err, Error::InvalidState { .. }));
}

#[tokio::test]
async fn status_query_for_unknown_job_is_not_found() {
    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(MockEngine::new());
    let node = build_node(test_config("node-1"), store, engine);

    let err = node.get_status(crate::types::JobId::new()).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn invalid_url_is_rejected_before_admission() {
    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(MockEngine::new());
    let node = build_node(test_config("node-1"), store, engine);

    let err = node
        .submit("not a url", JobOptions::default(), Tier::Standard)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidUrl(_)));

    assert_eq!(
        node.admission.in_flight(Tier::Standard).await.unwrap(),
        0,
        "rejected submissions must not consume admission slots"
    );
}

#[tokio::test]
async fn submissions_rejected_while_shutting_down() {
    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(MockEngine::new());
    let node = build_node(test_config("node-1"), store, engine);

    node.enter_maintenance().await;

    let err = node
        .submit(URL, JobOptions::default(), Tier::Standard)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ShuttingDown));
}

#[tokio::test]
async fn stale_progress_update_is_a_no_op() {
    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(MockEngine::new());
    let node = build_node(test_config("node-1"), store, engine);

    let id = node
        .submit(URL, JobOptions::default(), Tier::Standard)
        .await
        .unwrap();
    let claimed = node.claim_job(id).await.unwrap().unwrap();

    // A progress report from a previous (migrated/cancelled) attempt
    node.report_progress(id, claimed.attempt + 7, 55.0, Some("downloading"))
        .await
        .unwrap();

    let job = node.get_status(id).await.unwrap();
    assert_eq!(
        job.progress,
        Some(0.0),
        "late update from a non-owning attempt must be discarded"
    );

    // The owning attempt's report lands
    node.report_progress(id, claimed.attempt, 55.0, Some("downloading"))
        .await
        .unwrap();
    let job = node.get_status(id).await.unwrap();
    assert_eq!(job.progress, Some(55.0));
}

#[tokio::test]
async fn progress_report_on_terminal_job_is_a_no_op() {
    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(MockEngine::new());
    let node = build_node(test_config("node-1"), store, engine);
    let _dispatcher = node.start_dispatcher();

    let id = node
        .submit(URL, JobOptions::default(), Tier::Standard)
        .await
        .unwrap();
    let job = wait_for_status(&node, id, JobStatus::Success, Duration::from_secs(5)).await;

    node.report_progress(id, job.attempt, 10.0, None).await.unwrap();

    let after = node.get_status(id).await.unwrap();
    assert_eq!(after.status, JobStatus::Success);
    assert_eq!(after.progress, Some(100.0), "terminal state must be immutable");
}

#[tokio::test]
async fn concurrent_claims_assign_exactly_one_owner() {
    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(MockEngine::new());

    let node1 = build_node(test_config("node-1"), store.clone(), engine.clone());
    let node2 = build_node(test_config("node-2"), store.clone(), engine.clone());

    let id = node1
        .submit(URL, JobOptions::default(), Tier::Standard)
        .await
        .unwrap();

    let (claim1, claim2) = tokio::join!(node1.claim_job(id), node2.claim_job(id));
    let claims = [claim1.unwrap(), claim2.unwrap()];
    let winners = claims.iter().flatten().count();
    assert_eq!(winners, 1, "exactly one node may claim a job");

    let job = node1.get_status(id).await.unwrap();
    assert_eq!(job.status, JobStatus::Running);
    assert_eq!(job.attempt, 1);
    let owner = job.owner_node.unwrap();
    assert!(owner == "node-1" || owner == "node-2");
}

#[tokio::test]
async fn fifo_dispatch_order_is_best_effort_preserved() {
    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(MockEngine::new());
    let node = build_node(test_config("node-1"), store.clone(), engine);

    let first = node
        .submit(URL, JobOptions::default(), Tier::Standard)
        .await
        .unwrap();
    let second = node
        .submit(URL, JobOptions::default(), Tier::Standard)
        .await
        .unwrap();

    assert_eq!(
        store.list_pop(keys::PENDING_QUEUE).await.unwrap(),
        Some(first.to_string())
    );
    assert_eq!(
        store.list_pop(keys::PENDING_QUEUE).await.unwrap(),
        Some(second.to_string())
    );
}
