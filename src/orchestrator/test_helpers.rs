//! Shared test helpers for orchestrator tests: a scriptable fetch engine,
//! an accelerator stub, and fast-timing configurations.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::engine::{AcceleratorClient, FetchEngine, FetchOutcome, FetchRequest};
use crate::error::{Error, Result};
use crate::orchestrator::Orchestrator;
use crate::resource::{ResourceUsage, StaticResourceSampler};
use crate::store::MemoryStore;
use crate::strategy::DownloadMethod;
use crate::types::{JobId, JobOptions, JobStatus, MediaMetadata, ProgressUpdate};

/// One scripted outcome for a MockEngine fetch call
pub(crate) enum ScriptedFetch {
    /// Send a mid-transfer progress update, then succeed with this payload
    Success(serde_json::Value),
    /// Fail with a transient error
    Transient(&'static str),
    /// Fail with a permanent error
    Permanent(&'static str),
    /// Fail with a method-specific error (triggers standard fallback)
    MethodFailed(&'static str),
    /// Fail with a resource-exhausted error
    ResourceExhausted(&'static str),
    /// Sleep until the cancellation token fires, then report cancellation
    HangUntilCancelled,
    /// Sleep for an hour ignoring the token (exercises forced termination)
    HangIgnoringCancel,
}

/// Scriptable [`FetchEngine`]: pops one [`ScriptedFetch`] per call, falling
/// back to success once the script is exhausted.
pub(crate) struct MockEngine {
    pub(crate) meta: Mutex<MediaMetadata>,
    pub(crate) script: Mutex<VecDeque<ScriptedFetch>>,
    pub(crate) fetch_calls: AtomicU32,
    pub(crate) methods_used: Mutex<Vec<DownloadMethod>>,
}

impl MockEngine {
    pub(crate) fn new() -> Self {
        Self {
            meta: Mutex::new(MediaMetadata::default()),
            script: Mutex::new(VecDeque::new()),
            fetch_calls: AtomicU32::new(0),
            methods_used: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_meta(self, meta: MediaMetadata) -> Self {
        *self.meta.lock().unwrap() = meta;
        self
    }

    pub(crate) fn push(&self, outcome: ScriptedFetch) {
        self.script.lock().unwrap().push_back(outcome);
    }

    pub(crate) fn fetch_count(&self) -> u32 {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn methods_used(&self) -> Vec<DownloadMethod> {
        self.methods_used.lock().unwrap().clone()
    }
}

#[async_trait]
impl FetchEngine for MockEngine {
    async fn probe(&self, _url: &str, _options: &JobOptions) -> Result<MediaMetadata> {
        Ok(self.meta.lock().unwrap().clone())
    }

    async fn fetch(
        &self,
        request: FetchRequest,
        progress: tokio::sync::mpsc::Sender<ProgressUpdate>,
        cancel: CancellationToken,
    ) -> Result<FetchOutcome> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.methods_used.lock().unwrap().push(request.method);

        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ScriptedFetch::Success(serde_json::json!({
                "filename": "video.mp4"
            })));

        match outcome {
            ScriptedFetch::Success(payload) => {
                progress
                    .send(ProgressUpdate {
                        percent: 50.0,
                        stage: Some("downloading".to_string()),
                        speed_bps: Some(1_000_000),
                    })
                    .await
                    .ok();
                Ok(FetchOutcome { payload })
            }
            ScriptedFetch::Transient(msg) => Err(Error::Transient(msg.to_string())),
            ScriptedFetch::Permanent(msg) => Err(Error::Permanent(msg.to_string())),
            ScriptedFetch::MethodFailed(reason) => Err(Error::MethodFailed {
                method: request.method,
                reason: reason.to_string(),
            }),
            ScriptedFetch::ResourceExhausted(msg) => {
                Err(Error::ResourceExhausted(msg.to_string()))
            }
            ScriptedFetch::HangUntilCancelled => {
                cancel.cancelled().await;
                Err(Error::Transient("transfer interrupted by cancellation".to_string()))
            }
            ScriptedFetch::HangIgnoringCancel => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(Error::Transient("unreachable".to_string()))
            }
        }
    }
}

/// Accelerator stub with a switchable reachability flag
pub(crate) struct MockAccelerator {
    pub(crate) reachable: std::sync::atomic::AtomicBool,
}

impl MockAccelerator {
    pub(crate) fn new(reachable: bool) -> Self {
        Self {
            reachable: std::sync::atomic::AtomicBool::new(reachable),
        }
    }
}

#[async_trait]
impl AcceleratorClient for MockAccelerator {
    async fn ping(&self) -> Result<()> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::Transient("daemon not responding".to_string()))
        }
    }
}

/// Configuration with millisecond-scale timings so tests never wait on
/// production intervals.
pub(crate) fn test_config(node_id: &str) -> Config {
    let mut config = Config::default();
    config.node_id = node_id.to_string();

    config.cluster.heartbeat_interval = Duration::from_millis(50);
    config.cluster.failover_timeout = Duration::from_millis(150);
    config.cluster.shutdown_grace = Duration::from_millis(500);
    config.cluster.shutdown_poll = Duration::from_millis(20);

    config.retry.base_delay = Duration::from_millis(10);
    config.retry.max_delay = Duration::from_millis(100);
    config.retry.jitter = 0.0;

    config.execution.job_timeout = Duration::from_secs(5);
    config.execution.rpc_timeout = Duration::from_secs(1);
    config.execution.cancel_grace = Duration::from_millis(100);
    config.execution.dispatch_poll_interval = Duration::from_millis(10);
    config.execution.cancel_poll_interval = Duration::from_millis(20);

    // Health cycles run manually in tests
    config.health.check_interval = Duration::from_secs(3600);

    config.notifications.webhook_timeout = Duration::from_secs(1);
    config.notifications.webhook_retry_delay = Duration::from_millis(10);

    config
}

/// Build an orchestrator node over a shared store with a scripted engine
/// and healthy static resource readings.
pub(crate) fn build_node(
    config: Config,
    store: Arc<MemoryStore>,
    engine: Arc<MockEngine>,
) -> Orchestrator {
    Orchestrator::new(config, store, engine)
        .unwrap()
        .with_resource_sampler(Arc::new(StaticResourceSampler::new(ResourceUsage {
            cpu_percent: 10.0,
            memory_percent: 20.0,
            disk_percent: 30.0,
        })))
}

/// Poll a job until it reaches `expected` or the timeout elapses.
pub(crate) async fn wait_for_status(
    orchestrator: &Orchestrator,
    id: JobId,
    expected: JobStatus,
    timeout: Duration,
) -> crate::types::Job {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Ok(job) = orchestrator.get_status(id).await
            && job.status == expected
        {
            return job;
        }
        if tokio::time::Instant::now() >= deadline {
            let current = orchestrator.get_status(id).await;
            panic!("job {id} did not reach {expected:?} within {timeout:?}, currently {current:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
