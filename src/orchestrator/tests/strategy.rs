//! Strategy integration tests: selector wiring at dispatch time and the
//! one-shot runtime fallback to the standard method.

use std::sync::Arc;
use std::time::Duration;

use crate::orchestrator::test_helpers::*;
use crate::store::MemoryStore;
use crate::strategy::{DownloadMethod, StrategyOverride};
use crate::types::{Event, JobOptions, JobStatus, MediaMetadata, StreamProtocol, Tier};

const URL: &str = "https://media.example.com/watch?v=strategy";

fn accelerated_config() -> crate::config::Config {
    let mut config = test_config("node-1");
    config.strategy.accelerator_enabled = true;
    config
}

#[tokio::test]
async fn large_file_with_reachable_daemon_uses_accelerated() {
    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(MockEngine::new().with_meta(MediaMetadata {
        // 10x the 50 MiB threshold
        filesize: Some(500 * 1024 * 1024),
        ..Default::default()
    }));

    let node = build_node(accelerated_config(), store, engine.clone())
        .with_accelerator(Arc::new(MockAccelerator::new(true)));
    let _dispatcher = node.start_dispatcher();

    let id = node
        .submit(URL, JobOptions::default(), Tier::Standard)
        .await
        .unwrap();
    let job = wait_for_status(&node, id, JobStatus::Success, Duration::from_secs(5)).await;

    assert_eq!(job.method, Some(DownloadMethod::Accelerated));
    assert_eq!(engine.methods_used(), vec![DownloadMethod::Accelerated]);
}

#[tokio::test]
async fn daemon_rpc_failure_falls_back_to_standard_without_retry_cost() {
    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(MockEngine::new().with_meta(MediaMetadata {
        filesize: Some(500 * 1024 * 1024),
        ..Default::default()
    }));
    engine.push(ScriptedFetch::MethodFailed("daemon rpc refused the transfer"));

    let node = build_node(accelerated_config(), store, engine.clone())
        .with_accelerator(Arc::new(MockAccelerator::new(true)));
    let mut events = node.subscribe();
    let _dispatcher = node.start_dispatcher();

    let id = node
        .submit(URL, JobOptions::default(), Tier::Standard)
        .await
        .unwrap();
    let job = wait_for_status(&node, id, JobStatus::Success, Duration::from_secs(5)).await;

    assert_eq!(
        job.retry_count, 0,
        "method fallback is local to the attempt and costs no retry"
    );
    assert_eq!(job.method, Some(DownloadMethod::Standard));
    assert_eq!(
        engine.methods_used(),
        vec![DownloadMethod::Accelerated, DownloadMethod::Standard]
    );

    let mut fallback_from = None;
    while let Ok(event) = events.try_recv() {
        if let Event::MethodFallback { from, .. } = event {
            fallback_from = Some(from);
        }
    }
    assert_eq!(fallback_from, Some(DownloadMethod::Accelerated));
}

#[tokio::test]
async fn method_failure_on_standard_does_not_fall_back_again() {
    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(MockEngine::new());
    // Selector picks standard (no daemon); a method failure there goes
    // through the normal transient-retry path instead of looping.
    engine.push(ScriptedFetch::MethodFailed("segment assembly failed"));
    engine.push(ScriptedFetch::Success(serde_json::json!({"ok": true})));

    let node = build_node(test_config("node-1"), store, engine.clone());
    let _dispatcher = node.start_dispatcher();

    let id = node
        .submit(URL, JobOptions::default(), Tier::Standard)
        .await
        .unwrap();
    let job = wait_for_status(&node, id, JobStatus::Success, Duration::from_secs(5)).await;

    assert_eq!(job.retry_count, 1, "standard-method failure consumes a retry");
    assert_eq!(
        engine.methods_used(),
        vec![DownloadMethod::Standard, DownloadMethod::Standard]
    );
}

#[tokio::test]
async fn unreachable_daemon_downgrades_large_file_to_standard() {
    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(MockEngine::new().with_meta(MediaMetadata {
        filesize: Some(500 * 1024 * 1024),
        ..Default::default()
    }));

    let node = build_node(accelerated_config(), store, engine.clone())
        .with_accelerator(Arc::new(MockAccelerator::new(false)));
    let _dispatcher = node.start_dispatcher();

    let id = node
        .submit(URL, JobOptions::default(), Tier::Standard)
        .await
        .unwrap();
    let job = wait_for_status(&node, id, JobStatus::Success, Duration::from_secs(5)).await;

    assert_eq!(job.method, Some(DownloadMethod::Standard));
}

#[tokio::test]
async fn hls_stream_uses_segmented_method() {
    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(MockEngine::new().with_meta(MediaMetadata {
        protocol: Some(StreamProtocol::Hls),
        ..Default::default()
    }));

    let node = build_node(accelerated_config(), store, engine.clone())
        .with_accelerator(Arc::new(MockAccelerator::new(true)));
    let _dispatcher = node.start_dispatcher();

    let id = node
        .submit(URL, JobOptions::default(), Tier::Standard)
        .await
        .unwrap();
    let job = wait_for_status(&node, id, JobStatus::Success, Duration::from_secs(5)).await;

    assert_eq!(job.method, Some(DownloadMethod::Segmented));
}

#[tokio::test]
async fn user_override_is_honored_at_dispatch() {
    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(MockEngine::new().with_meta(MediaMetadata {
        protocol: Some(StreamProtocol::Hls),
        ..Default::default()
    }));

    let node = build_node(accelerated_config(), store, engine.clone())
        .with_accelerator(Arc::new(MockAccelerator::new(true)));
    let _dispatcher = node.start_dispatcher();

    let options = JobOptions {
        strategy: Some(StrategyOverride::Parallel),
        ..Default::default()
    };
    let id = node.submit(URL, options, Tier::Standard).await.unwrap();
    let job = wait_for_status(&node, id, JobStatus::Success, Duration::from_secs(5)).await;

    assert_eq!(
        job.method,
        Some(DownloadMethod::Parallel),
        "explicit override outranks the protocol rule"
    );
}
