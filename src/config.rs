//! Configuration types for fetchpool

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};

/// Cluster membership and failover configuration
///
/// Groups settings for heartbeat publication and stale-node detection.
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Interval between heartbeat publications (default: 30s)
    ///
    /// Each heartbeat is stored with TTL = 2 x this interval, so a node
    /// that misses two consecutive beats disappears from the store.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: Duration,

    /// Age after which a heartbeat is considered stale (default: 120s)
    ///
    /// Must be at least 3 x `heartbeat_interval` to avoid false-positive
    /// migrations under transient store latency; enforced by `validate()`.
    #[serde(default = "default_failover_timeout")]
    pub failover_timeout: Duration,

    /// Bounded wait for owned jobs to finish during graceful shutdown (default: 300s)
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace: Duration,

    /// Poll interval while waiting for owned jobs during shutdown (default: 10s)
    #[serde(default = "default_shutdown_poll")]
    pub shutdown_poll: Duration,

    /// TTL of the aggregated `cluster:status` record (default: 5 min)
    #[serde(default = "default_cluster_status_ttl")]
    pub cluster_status_ttl: Duration,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: default_heartbeat_interval(),
            failover_timeout: default_failover_timeout(),
            shutdown_grace: default_shutdown_grace(),
            shutdown_poll: default_shutdown_poll(),
            cluster_status_ttl: default_cluster_status_ttl(),
        }
    }
}

/// Admission control ceilings per caller tier
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Maximum concurrent non-terminal jobs for standard callers (default: 5)
    #[serde(default = "default_standard_limit")]
    pub standard_limit: usize,

    /// Maximum concurrent non-terminal jobs for elevated callers (default: 20)
    #[serde(default = "default_elevated_limit")]
    pub elevated_limit: usize,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            standard_limit: default_standard_limit(),
            elevated_limit: default_elevated_limit(),
        }
    }
}

/// Retry and backoff policy for transient job failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum retries per job (default: 3)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff delay; attempt n waits base x 2^n (default: 60s)
    #[serde(default = "default_base_delay")]
    pub base_delay: Duration,

    /// Cap applied to the computed backoff delay (default: 600s)
    #[serde(default = "default_max_delay")]
    pub max_delay: Duration,

    /// Jitter fraction applied symmetrically to the delay, 0.0..1.0 (default: 0.25)
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            jitter: default_jitter(),
        }
    }
}

/// Download strategy selector thresholds
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Whether the accelerated-download daemon integration is enabled (default: false)
    #[serde(default)]
    pub accelerator_enabled: bool,

    /// File size above which the accelerated method is preferred (default: 50 MiB)
    #[serde(default = "default_accelerated_threshold")]
    pub accelerated_threshold_bytes: u64,

    /// Duration above which the parallel method is preferred (default: 30 min)
    #[serde(default = "default_long_duration_threshold")]
    pub long_duration_threshold: Duration,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            accelerator_enabled: false,
            accelerated_threshold_bytes: default_accelerated_threshold(),
            long_duration_threshold: default_long_duration_threshold(),
        }
    }
}

/// Health monitor thresholds and cadence
///
/// The warning/critical percentages mirror the tunable set used by the
/// resource monitor; they are configuration, not invariants.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Interval between health check cycles (default: 60s)
    #[serde(default = "default_check_interval")]
    pub check_interval: Duration,

    /// Minimum interval before a warning with the same metric re-notifies (default: 5 min)
    #[serde(default = "default_alert_resend_interval")]
    pub alert_resend_interval: Duration,

    /// Minimum interval between cleanup corrective actions (default: 5 min)
    #[serde(default = "default_alert_resend_interval")]
    pub cleanup_min_interval: Duration,

    /// Alert history ring capacity (default: 1000)
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// CPU usage warning threshold, percent (default: 85)
    #[serde(default = "default_cpu_warning")]
    pub cpu_warning: f64,
    /// CPU usage critical threshold, percent (default: 95)
    #[serde(default = "default_cpu_critical")]
    pub cpu_critical: f64,

    /// Memory usage warning threshold, percent (default: 80)
    #[serde(default = "default_memory_warning")]
    pub memory_warning: f64,
    /// Memory usage critical threshold, percent (default: 90)
    #[serde(default = "default_memory_critical")]
    pub memory_critical: f64,

    /// Disk usage warning threshold, percent (default: 85)
    #[serde(default = "default_disk_warning")]
    pub disk_warning: f64,
    /// Disk usage critical threshold, percent (default: 95)
    #[serde(default = "default_disk_critical")]
    pub disk_critical: f64,

    /// Pending backlog length warning threshold (default: 100)
    #[serde(default = "default_backlog_warning")]
    pub backlog_warning: usize,
    /// Pending backlog length critical threshold (default: 500)
    #[serde(default = "default_backlog_critical")]
    pub backlog_critical: usize,

    /// Minimum active node count before a low-worker warning (default: 2)
    #[serde(default = "default_min_workers")]
    pub min_workers: usize,

    /// Store round-trip latency warning threshold (default: 100ms)
    #[serde(default = "default_store_latency_warning")]
    pub store_latency_warning: Duration,

    /// Rolling failure-rate warning threshold, 0.0..1.0 (default: 0.3)
    #[serde(default = "default_failure_rate_warning")]
    pub failure_rate_warning: f64,

    /// Number of recent terminal outcomes in the failure-rate window (default: 20)
    #[serde(default = "default_failure_window")]
    pub failure_window: usize,

    /// Maximum failed jobs re-enqueued per corrective cycle (default: 20)
    #[serde(default = "default_retry_batch_limit")]
    pub retry_batch_limit: usize,

    /// TTL of `health_snapshot:<ts>` records in the store (default: 24h)
    #[serde(default = "default_snapshot_ttl")]
    pub snapshot_ttl: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval: default_check_interval(),
            alert_resend_interval: default_alert_resend_interval(),
            cleanup_min_interval: default_alert_resend_interval(),
            history_limit: default_history_limit(),
            cpu_warning: default_cpu_warning(),
            cpu_critical: default_cpu_critical(),
            memory_warning: default_memory_warning(),
            memory_critical: default_memory_critical(),
            disk_warning: default_disk_warning(),
            disk_critical: default_disk_critical(),
            backlog_warning: default_backlog_warning(),
            backlog_critical: default_backlog_critical(),
            min_workers: default_min_workers(),
            store_latency_warning: default_store_latency_warning(),
            failure_rate_warning: default_failure_rate_warning(),
            failure_window: default_failure_window(),
            retry_batch_limit: default_retry_batch_limit(),
            snapshot_ttl: default_snapshot_ttl(),
        }
    }
}

/// Job execution limits and timeouts
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Maximum jobs executing concurrently on this node (default: 3)
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Hard wall-clock ceiling per job execution (default: 1h)
    #[serde(default = "default_job_timeout")]
    pub job_timeout: Duration,

    /// Per-call timeout for engine and daemon RPCs (default: 30s)
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout: Duration,

    /// Grace period between cooperative cancel and forced termination (default: 10s)
    #[serde(default = "default_cancel_grace")]
    pub cancel_grace: Duration,

    /// TTL of job records in the store (default: 24h)
    #[serde(default = "default_job_ttl")]
    pub job_ttl: Duration,

    /// Terminal jobs older than this are eligible for the cleanup pass (default: 6h)
    #[serde(default = "default_cleanup_horizon")]
    pub cleanup_horizon: Duration,

    /// Bound of the typed progress-event channel per job (default: 64)
    #[serde(default = "default_progress_buffer")]
    pub progress_buffer: usize,

    /// Poll interval of the dispatcher when the queue is empty (default: 500ms)
    #[serde(default = "default_dispatch_poll_interval")]
    pub dispatch_poll_interval: Duration,

    /// Poll interval of the cooperative cancellation flag watcher (default: 2s)
    #[serde(default = "default_cancel_poll_interval")]
    pub cancel_poll_interval: Duration,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            job_timeout: default_job_timeout(),
            rpc_timeout: default_rpc_timeout(),
            cancel_grace: default_cancel_grace(),
            job_ttl: default_job_ttl(),
            cleanup_horizon: default_cleanup_horizon(),
            progress_buffer: default_progress_buffer(),
            dispatch_poll_interval: default_dispatch_poll_interval(),
            cancel_poll_interval: default_cancel_poll_interval(),
        }
    }
}

/// Webhook delivery configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Per-request webhook timeout (default: 10s)
    #[serde(default = "default_webhook_timeout")]
    pub webhook_timeout: Duration,

    /// Delivery attempts before giving up (default: 3)
    #[serde(default = "default_webhook_attempts")]
    pub webhook_attempts: u32,

    /// Delay between delivery attempts (default: 2s)
    #[serde(default = "default_webhook_retry_delay")]
    pub webhook_retry_delay: Duration,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            webhook_timeout: default_webhook_timeout(),
            webhook_attempts: default_webhook_attempts(),
            webhook_retry_delay: default_webhook_retry_delay(),
        }
    }
}

/// Main configuration for the orchestrator
///
/// Fields are organized into logical sub-configs:
/// - [`cluster`](ClusterConfig) — heartbeats, failover, shutdown
/// - [`admission`](AdmissionConfig) — tier ceilings
/// - [`retry`](RetryConfig) — backoff policy
/// - [`strategy`](StrategyConfig) — selector thresholds
/// - [`health`](HealthConfig) — monitor cadence and thresholds
/// - [`execution`](ExecutionConfig) — concurrency and timeouts
/// - [`notifications`](NotificationConfig) — webhook delivery
///
/// All sub-config fields are flattened so the JSON/TOML format stays flat.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Identifier of this node within the cluster (default: "node-1")
    #[serde(default = "default_node_id")]
    pub node_id: String,

    /// Cluster membership and failover
    #[serde(flatten)]
    pub cluster: ClusterConfig,

    /// Admission ceilings
    #[serde(flatten)]
    pub admission: AdmissionConfig,

    /// Retry/backoff policy
    #[serde(flatten)]
    pub retry: RetryConfig,

    /// Strategy selector thresholds
    #[serde(flatten)]
    pub strategy: StrategyConfig,

    /// Health monitor settings
    #[serde(flatten)]
    pub health: HealthConfig,

    /// Execution limits and timeouts
    #[serde(flatten)]
    pub execution: ExecutionConfig,

    /// Webhook delivery settings
    #[serde(flatten)]
    pub notifications: NotificationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            cluster: ClusterConfig::default(),
            admission: AdmissionConfig::default(),
            retry: RetryConfig::default(),
            strategy: StrategyConfig::default(),
            health: HealthConfig::default(),
            execution: ExecutionConfig::default(),
            notifications: NotificationConfig::default(),
        }
    }
}

impl Config {
    /// Validate cross-field invariants.
    ///
    /// Because liveness has no explicit negative signal (only staleness),
    /// `failover_timeout` must be at least 3 x `heartbeat_interval` or
    /// transient store latency produces false-positive migrations.
    pub fn validate(&self) -> Result<()> {
        if self.node_id.is_empty() {
            return Err(Error::Config {
                message: "node_id must not be empty".to_string(),
                key: Some("node_id".to_string()),
            });
        }

        if self.cluster.failover_timeout < self.cluster.heartbeat_interval * 3 {
            return Err(Error::Config {
                message: format!(
                    "failover_timeout ({:?}) must be at least 3 x heartbeat_interval ({:?})",
                    self.cluster.failover_timeout, self.cluster.heartbeat_interval
                ),
                key: Some("failover_timeout".to_string()),
            });
        }

        if self.execution.max_concurrent_jobs == 0 {
            return Err(Error::Config {
                message: "max_concurrent_jobs must be at least 1".to_string(),
                key: Some("max_concurrent_jobs".to_string()),
            });
        }

        if self.admission.standard_limit == 0 || self.admission.elevated_limit == 0 {
            return Err(Error::Config {
                message: "admission ceilings must be at least 1".to_string(),
                key: Some("standard_limit".to_string()),
            });
        }

        if !(0.0..1.0).contains(&self.retry.jitter) {
            return Err(Error::Config {
                message: format!("jitter must be in 0.0..1.0, got {}", self.retry.jitter),
                key: Some("jitter".to_string()),
            });
        }

        if self.retry.base_delay > self.retry.max_delay {
            return Err(Error::Config {
                message: "base_delay must not exceed max_delay".to_string(),
                key: Some("base_delay".to_string()),
            });
        }

        Ok(())
    }
}

fn default_node_id() -> String {
    "node-1".to_string()
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_failover_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_shutdown_grace() -> Duration {
    Duration::from_secs(300)
}

fn default_shutdown_poll() -> Duration {
    Duration::from_secs(10)
}

fn default_cluster_status_ttl() -> Duration {
    Duration::from_secs(300)
}

fn default_standard_limit() -> usize {
    5
}

fn default_elevated_limit() -> usize {
    20
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(600)
}

fn default_jitter() -> f64 {
    0.25
}

fn default_accelerated_threshold() -> u64 {
    50 * 1024 * 1024
}

fn default_long_duration_threshold() -> Duration {
    Duration::from_secs(1800)
}

fn default_check_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_alert_resend_interval() -> Duration {
    Duration::from_secs(300)
}

fn default_history_limit() -> usize {
    1000
}

fn default_cpu_warning() -> f64 {
    85.0
}

fn default_cpu_critical() -> f64 {
    95.0
}

fn default_memory_warning() -> f64 {
    80.0
}

fn default_memory_critical() -> f64 {
    90.0
}

fn default_disk_warning() -> f64 {
    85.0
}

fn default_disk_critical() -> f64 {
    95.0
}

fn default_backlog_warning() -> usize {
    100
}

fn default_backlog_critical() -> usize {
    500
}

fn default_min_workers() -> usize {
    2
}

fn default_store_latency_warning() -> Duration {
    Duration::from_millis(100)
}

fn default_failure_rate_warning() -> f64 {
    0.3
}

fn default_failure_window() -> usize {
    20
}

fn default_retry_batch_limit() -> usize {
    20
}

fn default_snapshot_ttl() -> Duration {
    Duration::from_secs(86_400)
}

fn default_max_concurrent_jobs() -> usize {
    3
}

fn default_job_timeout() -> Duration {
    Duration::from_secs(3600)
}

fn default_rpc_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_cancel_grace() -> Duration {
    Duration::from_secs(10)
}

fn default_job_ttl() -> Duration {
    Duration::from_secs(86_400)
}

fn default_cleanup_horizon() -> Duration {
    Duration::from_secs(6 * 3600)
}

fn default_progress_buffer() -> usize {
    64
}

fn default_dispatch_poll_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_cancel_poll_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_webhook_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_webhook_attempts() -> u32 {
    3
}

fn default_webhook_retry_delay() -> Duration {
    Duration::from_secs(2)
}
