//! Job orchestration core split into focused submodules.
//!
//! The `Orchestrator` struct and its methods are organized by domain:
//! - [`lifecycle`] - Job state machine (submit/status/progress/complete/fail/cancel/retry)
//! - [`dispatch`] - Queue processing and ownership claims
//! - [`execution`] - Single job attempt execution with strategy fallback
//! - [`heartbeat`] - Cluster heartbeat publication and failover migration
//! - [`health`] - Auto-recovery health monitoring
//! - [`webhooks`] - Terminal-state webhook notifications

mod dispatch;
mod execution;
mod health;
mod heartbeat;
mod lifecycle;
mod webhooks;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::admission::AdmissionController;
use crate::config::Config;
use crate::engine::{AcceleratorClient, FetchEngine};
use crate::error::Result;
use crate::resource::{ResourceSampler, SystemResourceSampler};
use crate::store::{StateStore, keys};
use crate::strategy::StrategySelector;
use crate::types::{Alert, Event, JobId, QueueStats};

/// A job currently executing on this node
pub(crate) struct ActiveJob {
    /// Cooperative cancellation signal polled by the executor
    pub(crate) cancel_token: CancellationToken,
    /// Handle for forced termination after the cancellation grace period
    pub(crate) abort: tokio::task::AbortHandle,
}

/// Local execution state: concurrency limiting and active-job tracking
#[derive(Clone)]
pub(crate) struct QueueState {
    /// Semaphore bounding concurrent job executions on this node
    pub(crate) concurrent_limit: Arc<tokio::sync::Semaphore>,
    /// Jobs this node currently owns, with their cancellation handles
    pub(crate) active_jobs: Arc<tokio::sync::Mutex<HashMap<JobId, ActiveJob>>>,
    /// Whether this node accepts new submissions and dispatch
    pub(crate) accepting_new: Arc<AtomicBool>,
}

/// Mutable health-monitor state shared between the periodic loop and
/// on-demand recovery cycles triggered through the admin surface.
#[derive(Default)]
pub(crate) struct HealthState {
    /// Last notification time per warning metric (dedup window)
    pub(crate) last_notified: HashMap<String, DateTime<Utc>>,
    /// Last time a cleanup corrective action ran
    pub(crate) last_cleanup: Option<DateTime<Utc>>,
}

/// Main orchestrator instance (cloneable - all fields are Arc-wrapped).
///
/// One `Orchestrator` is one node of the worker pool. External
/// collaborators — the shared state store, the media-extraction engine,
/// the optional accelerated-download daemon client, and the resource
/// sampler — are injected as trait objects at construction, never reached
/// through globals.
#[derive(Clone)]
pub struct Orchestrator {
    /// Shared state store handle
    pub(crate) store: Arc<dyn StateStore>,
    /// Media-extraction engine boundary
    pub(crate) engine: Arc<dyn FetchEngine>,
    /// Optional accelerated-download daemon client
    pub(crate) accelerator: Option<Arc<dyn AcceleratorClient>>,
    /// Resource usage source for the health monitor
    pub(crate) resources: Arc<dyn ResourceSampler>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: tokio::sync::broadcast::Sender<Event>,
    /// Configuration
    pub(crate) config: Arc<Config>,
    /// Tiered concurrency gate
    pub(crate) admission: AdmissionController,
    /// Download strategy selector
    pub(crate) selector: StrategySelector,
    /// Local execution state
    pub(crate) queue_state: QueueState,
    /// Whether this node is draining for shutdown
    pub(crate) in_maintenance: Arc<AtomicBool>,
    /// Bounded ring of raised alerts (newest last)
    pub(crate) alert_history: Arc<std::sync::Mutex<VecDeque<Alert>>>,
    /// Rolling window of recent terminal outcomes (true = success)
    pub(crate) outcomes: Arc<std::sync::Mutex<VecDeque<bool>>>,
    /// Health monitor dedup/corrective state
    pub(crate) health_state: Arc<tokio::sync::Mutex<HealthState>>,
    /// Root cancellation token for background loops
    pub(crate) shutdown_token: CancellationToken,
}

impl Orchestrator {
    /// Create an orchestrator node over the given store and engine.
    ///
    /// Validates the configuration. The accelerated-daemon client defaults
    /// to absent and the resource sampler to [`SystemResourceSampler`] over
    /// the current directory; both can be replaced with the `with_*`
    /// builder methods before the background loops start.
    pub fn new(
        config: Config,
        store: Arc<dyn StateStore>,
        engine: Arc<dyn FetchEngine>,
    ) -> Result<Self> {
        config.validate()?;

        let (event_tx, _rx) = tokio::sync::broadcast::channel(1000);
        let admission = AdmissionController::new(store.clone(), config.admission.clone());
        let selector = StrategySelector::new(config.strategy.clone());

        let queue_state = QueueState {
            concurrent_limit: Arc::new(tokio::sync::Semaphore::new(
                config.execution.max_concurrent_jobs,
            )),
            active_jobs: Arc::new(tokio::sync::Mutex::new(HashMap::new())),
            accepting_new: Arc::new(AtomicBool::new(true)),
        };

        tracing::info!(
            node_id = %config.node_id,
            max_concurrent_jobs = config.execution.max_concurrent_jobs,
            accelerator_enabled = config.strategy.accelerator_enabled,
            "orchestrator node initialized"
        );

        Ok(Self {
            store,
            engine,
            accelerator: None,
            resources: Arc::new(SystemResourceSampler::new(".")),
            event_tx,
            config: Arc::new(config),
            admission,
            selector,
            queue_state,
            in_maintenance: Arc::new(AtomicBool::new(false)),
            alert_history: Arc::new(std::sync::Mutex::new(VecDeque::new())),
            outcomes: Arc::new(std::sync::Mutex::new(VecDeque::new())),
            health_state: Arc::new(tokio::sync::Mutex::new(HealthState::default())),
            shutdown_token: CancellationToken::new(),
        })
    }

    /// Attach an accelerated-download daemon client
    pub fn with_accelerator(mut self, client: Arc<dyn AcceleratorClient>) -> Self {
        self.accelerator = Some(client);
        self
    }

    /// Replace the resource sampler
    pub fn with_resource_sampler(mut self, sampler: Arc<dyn ResourceSampler>) -> Self {
        self.resources = sampler;
        self
    }

    /// Subscribe to orchestration events.
    ///
    /// Multiple subscribers are supported; each receives all events
    /// independently. A subscriber that falls behind by more than 1000
    /// events receives a `RecvError::Lagged`.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// This node's identifier within the cluster
    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    /// Emit an event to all subscribers.
    ///
    /// If there are no active subscribers the event is dropped; job
    /// processing never depends on anyone listening.
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    /// Start the dispatcher, heartbeat coordinator, and health monitor.
    ///
    /// Returns the join handles; the loops run until [`shutdown`] is
    /// called (or the handles are aborted).
    ///
    /// [`shutdown`]: Orchestrator::shutdown
    pub fn start_background_tasks(&self) -> Vec<tokio::task::JoinHandle<()>> {
        vec![
            self.start_dispatcher(),
            self.start_heartbeat_coordinator(),
            self.start_health_monitor(),
        ]
    }

    /// Queue statistics for this node
    pub async fn queue_stats(&self) -> Result<QueueStats> {
        let pending = self.store.list_len(keys::PENDING_QUEUE).await?;
        let active = self.queue_state.active_jobs.lock().await.len();
        Ok(QueueStats {
            pending,
            active,
            accepting_new: self
                .queue_state
                .accepting_new
                .load(std::sync::atomic::Ordering::SeqCst),
        })
    }

    /// Most recent alerts, newest first, up to `limit`
    pub fn recent_alerts(&self, limit: usize) -> Vec<Alert> {
        let history = match self.alert_history.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        history.iter().rev().take(limit).cloned().collect()
    }

    /// Record a terminal outcome in the rolling failure-rate window
    pub(crate) fn record_outcome(&self, success: bool) {
        let mut outcomes = match self.outcomes.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        outcomes.push_back(success);
        while outcomes.len() > self.config.health.failure_window {
            outcomes.pop_front();
        }
    }

    /// Gracefully shut this node down.
    ///
    /// Enters maintenance (stops accepting submissions and dispatch),
    /// waits up to `shutdown_grace` for owned jobs to reach a terminal
    /// state, deletes this node's heartbeat so no coordinator treats the
    /// departure as a failure, and stops the background loops.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!(node_id = %self.node_id(), "graceful shutdown initiated");
        self.emit_event(Event::Shutdown);

        self.graceful_drain().await;
        self.shutdown_token.cancel();

        Ok(())
    }
}
