//! Retry backoff with exponential delay and jitter
//!
//! Failed jobs are re-enqueued with a delay of `base x 2^retry_count`,
//! capped at a configured maximum, with symmetric random jitter applied to
//! avoid thundering-herd retries when many jobs fail at once.

use rand::Rng;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::Error;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (network timeouts, connection resets, store hiccups)
/// should return `true`; permanent failures (not found, forbidden, exhausted
/// quota) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Transient(_) => true,
            // Store round-trips ride the same network as everything else
            Error::Store(_) => true,
            Error::Network(e) => e.is_timeout() || e.is_connect(),
            // Method-specific failures are handled by the strategy fallback,
            // and after falling back they count as transient
            Error::MethodFailed { .. } => true,
            // Wall-clock ceiling, permanent and state errors are never retried
            Error::Timeout { .. }
            | Error::Permanent(_)
            | Error::ResourceExhausted(_)
            | Error::AdmissionRejected { .. }
            | Error::NotFound(_)
            | Error::InvalidState { .. }
            | Error::InvalidUrl(_)
            | Error::Config { .. }
            | Error::ShuttingDown
            | Error::Serialization(_)
            | Error::Other(_) => false,
        }
    }
}

/// Deterministic backoff delay for the given retry count: `base x 2^count`,
/// capped at `max_delay`.
pub fn base_delay(config: &RetryConfig, retry_count: u32) -> Duration {
    let multiplier = 2_u64.saturating_pow(retry_count.min(32));
    config
        .base_delay
        .saturating_mul(multiplier.min(u32::MAX as u64) as u32)
        .min(config.max_delay)
}

/// Backoff delay with symmetric jitter applied.
///
/// The jittered delay stays within `base ± base x jitter` and never exceeds
/// the configured cap.
pub fn backoff_delay(config: &RetryConfig, retry_count: u32) -> Duration {
    let base = base_delay(config, retry_count);
    if config.jitter <= 0.0 {
        return base;
    }

    let mut rng = rand::thread_rng();
    let factor: f64 = rng.gen_range(-config.jitter..=config.jitter);
    let jittered = base.as_secs_f64() * (1.0 + factor);
    Duration::from_secs_f64(jittered.max(0.0)).min(config.max_delay)
}
