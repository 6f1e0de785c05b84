//! Core types for fetchpool

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;
use crate::strategy::{DownloadMethod, StrategyOverride};

/// Unique identifier for a job
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct JobId(pub uuid::Uuid);

impl JobId {
    /// Generate a fresh random job identifier
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Get the inner UUID value
    pub fn get(&self) -> uuid::Uuid {
        self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<uuid::Uuid> for JobId {
    fn from(id: uuid::Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Job lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Created and waiting for dispatch
    Pending,
    /// Claimed by a node and executing
    Running,
    /// Failed with a recoverable error, waiting for re-dispatch
    Retrying,
    /// Completed successfully (terminal)
    Success,
    /// Failed permanently (terminal)
    Failed,
    /// Cancelled by the client (terminal)
    Cancelled,
}

impl JobStatus {
    /// Whether this status is terminal. Terminal jobs never transition again,
    /// with the single sanctioned exception of `Failed -> Retrying` through
    /// the lifecycle manager's explicit retry contract.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failed | JobStatus::Cancelled)
    }

    /// Whether the lifecycle state machine permits moving from `self` to `to`.
    ///
    /// Edges:
    /// - Pending -> Running (dispatch), Cancelled
    /// - Running -> Success, Failed, Retrying, Cancelled, Pending (migration)
    /// - Retrying -> Running (re-dispatch), Cancelled
    /// - Failed -> Retrying (explicit retry only)
    /// - Success, Cancelled -> nothing
    pub fn can_transition_to(&self, to: JobStatus) -> bool {
        use JobStatus::*;
        match self {
            Pending => matches!(to, Running | Cancelled),
            Running => matches!(to, Success | Failed | Retrying | Cancelled | Pending),
            Retrying => matches!(to, Running | Cancelled),
            Failed => matches!(to, Retrying),
            Success | Cancelled => false,
        }
    }

    /// Status string used in store records and webhook payloads
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Retrying => "retrying",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

/// Caller tier used for admission control ceilings
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Default tier
    #[default]
    Standard,
    /// Elevated-privilege callers (higher concurrency ceiling)
    Elevated,
}

impl Tier {
    /// Tier name used in store keys and error messages
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Standard => "standard",
            Tier::Elevated => "elevated",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options supplied at job submission, passed through to the fetch engine
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct JobOptions {
    /// Requested quality (e.g. "best", "720p")
    #[serde(default)]
    pub quality: Option<String>,

    /// Explicit format identifier understood by the extraction engine
    #[serde(default)]
    pub format_id: Option<String>,

    /// Download audio only
    #[serde(default)]
    pub audio_only: bool,

    /// Fetch subtitles alongside the media
    #[serde(default)]
    pub subtitles: bool,

    /// Subtitle language code
    #[serde(default)]
    pub subtitle_lang: Option<String>,

    /// Webhook invoked once when the job reaches a terminal state
    #[serde(default)]
    pub webhook_url: Option<String>,

    /// Force a specific download method, overriding the selector
    #[serde(default)]
    pub strategy: Option<StrategyOverride>,
}

/// Error recorded on a FAILED job: taxonomy code plus human-readable message
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    /// Machine-readable taxonomy code
    pub code: ErrorCode,
    /// Human-readable message
    pub message: String,
}

/// A single unit of fetch work tracked through the lifecycle state machine.
///
/// Persisted as `job:<job_id>` in the shared state store with a 24h TTL.
/// The lifecycle manager is the sole writer of job-visible error state;
/// workers mutate progress through it and the failover coordinator only
/// ever clears ownership and re-queues.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Job {
    /// Unique job identifier
    pub id: JobId,

    /// Media URL to fetch
    pub url: String,

    /// Pass-through options from submission
    #[serde(default)]
    pub options: JobOptions,

    /// Admission tier the job was admitted under
    #[serde(default)]
    pub tier: Tier,

    /// Current lifecycle status
    pub status: JobStatus,

    /// Node currently executing the job (None while not running)
    #[serde(default)]
    pub owner_node: Option<String>,

    /// Execution generation, incremented on every dispatch claim.
    /// Guards against late updates from a migrated or cancelled attempt.
    #[serde(default)]
    pub attempt: u32,

    /// When the job was created
    pub created_at: DateTime<Utc>,

    /// When the record was last mutated
    pub updated_at: DateTime<Utc>,

    /// When execution first started (None until first dispatch)
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,

    /// When the job reached a terminal state
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,

    /// Advisory progress percentage (0-100)
    #[serde(default)]
    pub progress: Option<f32>,

    /// Advisory execution stage ("initializing", "downloading", ...)
    #[serde(default)]
    pub stage: Option<String>,

    /// Download method chosen by the strategy selector for the latest attempt
    #[serde(default)]
    pub method: Option<DownloadMethod>,

    /// Number of retries consumed (bounded by `max_retries`)
    #[serde(default)]
    pub retry_count: u32,

    /// Annotation appended when the job was migrated off a failed node
    #[serde(default)]
    pub migration_note: Option<String>,

    /// Opaque engine-provided payload on SUCCESS
    #[serde(default)]
    pub result: Option<serde_json::Value>,

    /// Taxonomy code and message on FAILED
    #[serde(default)]
    pub error: Option<JobError>,
}

impl Job {
    /// Create a fresh PENDING job record
    pub fn new(url: String, options: JobOptions, tier: Tier) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            url,
            options,
            tier,
            status: JobStatus::Pending,
            owner_node: None,
            attempt: 0,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            progress: None,
            stage: None,
            method: None,
            retry_count: 0,
            migration_note: None,
            result: None,
            error: None,
        }
    }
}

/// Node liveness state carried in heartbeats
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// Accepting dispatch and publishing heartbeats
    Active,
    /// Draining for shutdown, not accepting new dispatch
    Maintenance,
}

/// Liveness record republished every `heartbeat_interval` by each node.
///
/// Persisted as `heartbeat:<node_id>` with TTL = 2 x heartbeat_interval.
/// Absence of a fresh record is the sole failure signal.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeHeartbeat {
    /// Node identifier
    pub node_id: String,
    /// When the heartbeat was published
    pub timestamp: DateTime<Utc>,
    /// Node status
    pub status: NodeStatus,
    /// Node load percentage (0-100)
    pub load: f32,
    /// Number of jobs this node currently owns
    pub active_job_count: u32,
}

/// Aggregate cluster view, rebuilt each coordinator cycle from all heartbeats.
///
/// Cache-only (`cluster:status`, TTL 5 min), never authoritative.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClusterStatus {
    /// When the aggregate was built
    pub timestamp: DateTime<Utc>,
    /// Number of nodes with a fresh heartbeat
    pub active_nodes: usize,
    /// Number of nodes detected stale this cycle
    pub stale_nodes: usize,
    /// Total nodes observed
    pub total_nodes: usize,
    /// Fresh heartbeats by node
    pub nodes: Vec<NodeHeartbeat>,
    /// Node ids detected stale this cycle
    pub stale_node_ids: Vec<String>,
}

/// Alert severity
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Degraded but operational
    Warning,
    /// Requires attention, corrective action may be taken
    Critical,
}

/// A health observation that crossed a threshold. Immutable once recorded.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Alert {
    /// When the alert was raised
    pub timestamp: DateTime<Utc>,
    /// Metric that crossed the threshold (e.g. "disk_percent")
    pub metric: String,
    /// Alert severity
    pub severity: Severity,
    /// Observed value
    pub value: f64,
    /// Threshold that was crossed
    pub threshold: f64,
    /// Human-readable message
    pub message: String,
}

/// Corrective action kinds taken by the health monitor
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    /// Purge expired terminal records to relieve storage pressure
    CleanupPass,
    /// Reset the shared state store client connections
    StoreReset,
    /// Re-enqueue FAILED jobs still eligible for retry
    FailedJobRetry,
}

/// Typed progress update delivered by the fetch engine over a bounded channel
#[derive(Clone, Debug, PartialEq)]
pub struct ProgressUpdate {
    /// Progress percentage (0-100)
    pub percent: f32,
    /// Execution stage, if the engine reports one
    pub stage: Option<String>,
    /// Current transfer speed in bytes per second
    pub speed_bps: Option<u64>,
}

/// Stream delivery protocol reported by the extraction engine
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamProtocol {
    /// Plain HTTP(S) file delivery
    Http,
    /// Segment-based streaming (HLS-like)
    Hls,
    /// Multi-stream delivery (DASH-like)
    Dash,
}

/// Media metadata obtained from the extraction engine's probe.
///
/// Consumed by the strategy selector; every field is optional because
/// extraction engines report wildly different subsets per site.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MediaMetadata {
    /// Media title
    #[serde(default)]
    pub title: Option<String>,

    /// Exact or approximate file size in bytes
    #[serde(default)]
    pub filesize: Option<u64>,

    /// Media duration in seconds
    #[serde(default)]
    pub duration_secs: Option<f64>,

    /// Delivery protocol of the best format
    #[serde(default)]
    pub protocol: Option<StreamProtocol>,

    /// Container extension (e.g. "mp4")
    #[serde(default)]
    pub ext: Option<String>,
}

/// Event emitted during the job and cluster lifecycle
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Job admitted and enqueued
    JobQueued {
        /// Job ID
        id: JobId,
    },

    /// Job claimed by a node and started
    JobStarted {
        /// Job ID
        id: JobId,
        /// Claiming node
        node_id: String,
        /// Execution generation
        attempt: u32,
    },

    /// Advisory progress update
    JobProgress {
        /// Job ID
        id: JobId,
        /// Progress percentage (0-100)
        percent: f32,
        /// Execution stage
        #[serde(skip_serializing_if = "Option::is_none")]
        stage: Option<String>,
    },

    /// Job completed successfully
    JobCompleted {
        /// Job ID
        id: JobId,
    },

    /// Job failed terminally
    JobFailed {
        /// Job ID
        id: JobId,
        /// Taxonomy code
        code: ErrorCode,
        /// Error message
        error: String,
    },

    /// Job cancelled
    JobCancelled {
        /// Job ID
        id: JobId,
        /// Whether the executor confirmed cooperatively within the grace period
        forced: bool,
    },

    /// Job scheduled for a retry attempt after backoff
    JobRetryScheduled {
        /// Job ID
        id: JobId,
        /// Retry count after this schedule
        retry_count: u32,
        /// Backoff delay in milliseconds
        delay_ms: u64,
    },

    /// Job migrated off a stale node back to the pending pool
    JobMigrated {
        /// Job ID
        id: JobId,
        /// Node the job was migrated from
        from_node: String,
    },

    /// The chosen download method failed and execution fell back to standard
    MethodFallback {
        /// Job ID
        id: JobId,
        /// Method that failed
        from: DownloadMethod,
    },

    /// A node's heartbeat expired and its jobs were migrated
    NodeStale {
        /// Stale node ID
        node_id: String,
        /// Number of jobs migrated off it
        migrated_jobs: usize,
    },

    /// Health monitor raised an alert
    AlertRaised {
        /// The alert
        alert: Alert,
    },

    /// Health monitor took a corrective action
    RecoveryActionTaken {
        /// Action kind
        action: RecoveryAction,
        /// Human-readable detail
        detail: String,
    },

    /// Webhook delivery failed after all attempts
    WebhookFailed {
        /// Webhook URL
        url: String,
        /// Error message
        error: String,
    },

    /// Graceful shutdown initiated
    Shutdown,
}

/// Payload sent to the webhook configured on a job, once on terminal state
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WebhookPayload {
    /// Job ID
    pub job_id: JobId,

    /// Terminal status
    pub status: JobStatus,

    /// Opaque result payload (for successful jobs)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    /// Error code and message (for failed jobs)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,

    /// Unix timestamp of the event in seconds
    pub timestamp: i64,
}

/// Queue statistics for the local node
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueStats {
    /// Jobs waiting in the shared pending queue
    pub pending: usize,
    /// Jobs this node is currently executing
    pub active: usize,
    /// Whether this node is accepting new submissions and dispatch
    pub accepting_new: bool,
}
