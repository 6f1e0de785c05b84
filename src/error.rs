//! Error types for fetchpool
//!
//! The orchestration core uses a small closed taxonomy instead of broad
//! catch-all handling: every failure is classified as one of the variants
//! below, and only truly unexpected errors fall through to [`Error::Other`],
//! which is always logged and surfaced, never silently swallowed.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::strategy::DownloadMethod;
use crate::types::Tier;

/// Result type alias for fetchpool operations
pub type Result<T> = std::result::Result<T, Error>;

/// Machine-readable taxonomy code recorded on failed jobs and returned to
/// clients alongside the human-readable message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Network/timeout class, auto-retried with backoff
    Transient,
    /// Resource unavailable or forbidden, fails immediately without retry
    Permanent,
    /// Storage or quota exhausted, fails the job and raises a critical alert
    ResourceExhausted,
    /// Concurrency ceiling hit at submission, not a job failure
    AdmissionRejected,
    /// Terminal failure after max retry attempts
    RetriesExhausted,
    /// Wall-clock execution ceiling exceeded
    Timeout,
    /// Job returned to PENDING transparently, not a user-visible failure
    MigrationInduced,
    /// Anything that escaped classification
    Unexpected,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCode::Transient => "transient",
            ErrorCode::Permanent => "permanent",
            ErrorCode::ResourceExhausted => "resource_exhausted",
            ErrorCode::AdmissionRejected => "admission_rejected",
            ErrorCode::RetriesExhausted => "retries_exhausted",
            ErrorCode::Timeout => "timeout",
            ErrorCode::MigrationInduced => "migration_induced",
            ErrorCode::Unexpected => "unexpected",
        };
        write!(f, "{s}")
    }
}

/// Main error type for fetchpool
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g. "failover_timeout")
        key: Option<String>,
    },

    /// Transient failure (network/timeout class), eligible for auto-retry
    #[error("transient error: {0}")]
    Transient(String),

    /// Permanent failure (not found, forbidden), never retried
    #[error("permanent error: {0}")]
    Permanent(String),

    /// Storage or quota exhausted
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Submission rejected by the admission controller
    #[error("admission rejected: {tier} tier ceiling of {limit} concurrent jobs reached")]
    AdmissionRejected {
        /// Tier the submission was gated under
        tier: Tier,
        /// The tier's ceiling, returned for client backoff guidance
        limit: usize,
    },

    /// Wall-clock execution ceiling exceeded
    #[error("job execution exceeded the {limit_secs}s wall-clock ceiling")]
    Timeout {
        /// The ceiling in seconds
        limit_secs: u64,
    },

    /// The chosen download method failed for a method-specific reason.
    /// Triggers a one-shot runtime fallback to the standard method.
    #[error("{method} download method failed: {reason}")]
    MethodFailed {
        /// The method that failed
        method: DownloadMethod,
        /// Why it failed
        reason: String,
    },

    /// Job or record not found (absent or expired)
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation not valid for the record's current state
    #[error("cannot {operation} job {id} in state {current_state}")]
    InvalidState {
        /// Job the operation targeted
        id: String,
        /// The operation that was attempted (e.g. "retry", "cancel")
        operation: String,
        /// The state that prevents it
        current_state: String,
    },

    /// Shared state store operation failed
    #[error("state store error: {0}")]
    Store(String),

    /// Shutdown in progress, not accepting new submissions
    #[error("shutdown in progress: not accepting new jobs")]
    ShuttingDown,

    /// Network error from webhook delivery or daemon RPC
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid submission URL
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Map this error to the closed taxonomy recorded on job records.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Transient(_) => ErrorCode::Transient,
            Error::Permanent(_) | Error::NotFound(_) | Error::InvalidUrl(_) => ErrorCode::Permanent,
            Error::ResourceExhausted(_) => ErrorCode::ResourceExhausted,
            Error::AdmissionRejected { .. } => ErrorCode::AdmissionRejected,
            Error::Timeout { .. } => ErrorCode::Timeout,
            Error::Network(e) => {
                if e.is_timeout() || e.is_connect() {
                    ErrorCode::Transient
                } else {
                    ErrorCode::Permanent
                }
            }
            Error::Store(_) => ErrorCode::Transient,
            Error::MethodFailed { .. } => ErrorCode::Transient,
            Error::Config { .. }
            | Error::InvalidState { .. }
            | Error::ShuttingDown
            | Error::Serialization(_)
            | Error::Other(_) => ErrorCode::Unexpected,
        }
    }

    /// Whether this failure is method-specific rather than global, meaning
    /// the executor should retry once with the standard method before
    /// surfacing a job failure.
    pub fn is_method_specific(&self) -> bool {
        matches!(self, Error::MethodFailed { .. })
    }
}
