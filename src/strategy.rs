//! Download strategy selection
//!
//! A pure decision function that picks a download technique per job from
//! extracted media metadata and user hints. The priority order is fixed and
//! total: identical inputs always yield the identical decision, and the
//! chain always terminates at the standard method.
//!
//! Runtime fallback is not handled here — when the chosen method fails for
//! a method-specific reason, the executor retries once with the standard
//! method without consuming a retry.

use serde::{Deserialize, Serialize};

use crate::config::StrategyConfig;
use crate::types::{MediaMetadata, StreamProtocol};

/// Download technique used to execute a job's transfer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadMethod {
    /// Plain single-connection transfer through the extraction engine
    Standard,
    /// Delegated to the external accelerated-download daemon
    Accelerated,
    /// Segment-based transfer for HLS-like streams
    Segmented,
    /// Multi-connection transfer for DASH-like or long media
    Parallel,
}

impl DownloadMethod {
    /// Method name used in job records and log fields
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadMethod::Standard => "standard",
            DownloadMethod::Accelerated => "accelerated",
            DownloadMethod::Segmented => "segmented",
            DownloadMethod::Parallel => "parallel",
        }
    }
}

impl std::fmt::Display for DownloadMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Explicit user override consumed once by the selector.
///
/// Replaces scattered force-this-mode booleans: a submission carries at most
/// one override, and the selector honors it only when it is consistent with
/// feature availability (forcing the accelerated method while the daemon is
/// disabled or unreachable falls through to the normal rules).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyOverride {
    /// Force the standard method
    Standard,
    /// Force the accelerated method (requires the daemon to be reachable)
    Accelerated,
    /// Force the segmented method
    Segmented,
    /// Force the parallel method
    Parallel,
}

impl StrategyOverride {
    fn method(&self) -> DownloadMethod {
        match self {
            StrategyOverride::Standard => DownloadMethod::Standard,
            StrategyOverride::Accelerated => DownloadMethod::Accelerated,
            StrategyOverride::Segmented => DownloadMethod::Segmented,
            StrategyOverride::Parallel => DownloadMethod::Parallel,
        }
    }
}

/// Outcome of strategy selection: the method plus a stable reason string.
///
/// Ephemeral — computed at dispatch time and recorded only through the
/// job's own method field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StrategyDecision {
    /// Chosen download method
    pub method: DownloadMethod,
    /// Why this method was chosen
    pub reason: String,
}

/// Strategy selector configured with size/duration thresholds
#[derive(Clone, Debug)]
pub struct StrategySelector {
    config: StrategyConfig,
}

impl StrategySelector {
    /// Create a selector with the given thresholds
    pub fn new(config: StrategyConfig) -> Self {
        Self { config }
    }

    /// Pick a download method for a job.
    ///
    /// Priority order, first match wins:
    /// 1. Explicit user override, if consistent with feature availability
    /// 2. Daemon disabled or unreachable -> standard
    /// 3. File size above the threshold -> accelerated
    /// 4. Segment-based streaming (HLS-like) -> segmented
    /// 5. Multi-stream delivery (DASH-like) -> parallel
    /// 6. Duration above the long-media threshold -> parallel
    /// 7. Default -> standard
    ///
    /// `daemon_reachable` is the availability of the accelerated-download
    /// daemon as sampled by the caller at dispatch time.
    pub fn select(
        &self,
        meta: &MediaMetadata,
        hint: Option<StrategyOverride>,
        daemon_reachable: bool,
    ) -> StrategyDecision {
        let daemon_available = self.config.accelerator_enabled && daemon_reachable;

        if let Some(forced) = hint {
            let consistent = forced != StrategyOverride::Accelerated || daemon_available;
            if consistent {
                return StrategyDecision {
                    method: forced.method(),
                    reason: format!("user override ({})", forced.method()),
                };
            }
            tracing::debug!(
                hint = %forced.method(),
                "ignoring user override inconsistent with daemon availability"
            );
        }

        if !daemon_available {
            return StrategyDecision {
                method: DownloadMethod::Standard,
                reason: "accelerated daemon disabled or unreachable".to_string(),
            };
        }

        if let Some(filesize) = meta.filesize
            && filesize > self.config.accelerated_threshold_bytes
        {
            return StrategyDecision {
                method: DownloadMethod::Accelerated,
                reason: format!(
                    "filesize {filesize} exceeds threshold {}",
                    self.config.accelerated_threshold_bytes
                ),
            };
        }

        match meta.protocol {
            Some(StreamProtocol::Hls) => {
                return StrategyDecision {
                    method: DownloadMethod::Segmented,
                    reason: "segment-based streaming protocol".to_string(),
                };
            }
            Some(StreamProtocol::Dash) => {
                return StrategyDecision {
                    method: DownloadMethod::Parallel,
                    reason: "multi-stream delivery protocol".to_string(),
                };
            }
            Some(StreamProtocol::Http) | None => {}
        }

        if let Some(duration) = meta.duration_secs
            && duration > self.config.long_duration_threshold.as_secs_f64()
        {
            return StrategyDecision {
                method: DownloadMethod::Parallel,
                reason: format!("duration {duration:.0}s exceeds long-media threshold"),
            };
        }

        StrategyDecision {
            method: DownloadMethod::Standard,
            reason: "default".to_string(),
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn selector(accelerator_enabled: bool) -> StrategySelector {
        StrategySelector::new(StrategyConfig {
            accelerator_enabled,
            accelerated_threshold_bytes: 50 * 1024 * 1024,
            long_duration_threshold: Duration::from_secs(1800),
        })
    }

    fn meta() -> MediaMetadata {
        MediaMetadata::default()
    }

    #[test]
    fn user_override_wins_when_consistent() {
        let s = selector(true);
        let decision = s.select(&meta(), Some(StrategyOverride::Parallel), true);
        assert_eq!(decision.method, DownloadMethod::Parallel);
        assert!(decision.reason.contains("override"));
    }

    #[test]
    fn accelerated_override_ignored_when_daemon_unreachable() {
        let s = selector(true);
        let decision = s.select(&meta(), Some(StrategyOverride::Accelerated), false);
        assert_eq!(
            decision.method,
            DownloadMethod::Standard,
            "inconsistent override must fall through to the rules"
        );
    }

    #[test]
    fn standard_override_honored_even_without_daemon() {
        let s = selector(false);
        let decision = s.select(&meta(), Some(StrategyOverride::Standard), false);
        assert_eq!(decision.method, DownloadMethod::Standard);
        assert!(decision.reason.contains("override"));
    }

    #[test]
    fn daemon_disabled_short_circuits_to_standard() {
        let s = selector(false);
        let huge = MediaMetadata {
            filesize: Some(10 * 1024 * 1024 * 1024),
            protocol: Some(StreamProtocol::Hls),
            duration_secs: Some(7200.0),
            ..meta()
        };
        let decision = s.select(&huge, None, true);
        assert_eq!(decision.method, DownloadMethod::Standard);
    }

    #[test]
    fn daemon_unreachable_short_circuits_to_standard() {
        let s = selector(true);
        let huge = MediaMetadata {
            filesize: Some(10 * 1024 * 1024 * 1024),
            ..meta()
        };
        let decision = s.select(&huge, None, false);
        assert_eq!(decision.method, DownloadMethod::Standard);
    }

    #[test]
    fn large_file_selects_accelerated() {
        let s = selector(true);
        let large = MediaMetadata {
            filesize: Some(500 * 1024 * 1024),
            ..meta()
        };
        let decision = s.select(&large, None, true);
        assert_eq!(decision.method, DownloadMethod::Accelerated);
    }

    #[test]
    fn file_at_threshold_does_not_select_accelerated() {
        let s = selector(true);
        let at_threshold = MediaMetadata {
            filesize: Some(50 * 1024 * 1024),
            ..meta()
        };
        let decision = s.select(&at_threshold, None, true);
        assert_ne!(decision.method, DownloadMethod::Accelerated);
    }

    #[test]
    fn hls_selects_segmented() {
        let s = selector(true);
        let hls = MediaMetadata {
            protocol: Some(StreamProtocol::Hls),
            ..meta()
        };
        assert_eq!(s.select(&hls, None, true).method, DownloadMethod::Segmented);
    }

    #[test]
    fn dash_selects_parallel() {
        let s = selector(true);
        let dash = MediaMetadata {
            protocol: Some(StreamProtocol::Dash),
            ..meta()
        };
        assert_eq!(s.select(&dash, None, true).method, DownloadMethod::Parallel);
    }

    #[test]
    fn filesize_rule_outranks_protocol_rule() {
        let s = selector(true);
        let both = MediaMetadata {
            filesize: Some(500 * 1024 * 1024),
            protocol: Some(StreamProtocol::Hls),
            ..meta()
        };
        assert_eq!(
            s.select(&both, None, true).method,
            DownloadMethod::Accelerated,
            "rule 3 must win over rule 4"
        );
    }

    #[test]
    fn long_duration_selects_parallel() {
        let s = selector(true);
        let long = MediaMetadata {
            duration_secs: Some(3600.0),
            ..meta()
        };
        assert_eq!(s.select(&long, None, true).method, DownloadMethod::Parallel);
    }

    #[test]
    fn empty_metadata_defaults_to_standard() {
        let s = selector(true);
        let decision = s.select(&meta(), None, true);
        assert_eq!(decision.method, DownloadMethod::Standard);
        assert_eq!(decision.reason, "default");
    }

    #[test]
    fn selection_is_deterministic() {
        let s = selector(true);
        let input = MediaMetadata {
            filesize: Some(200 * 1024 * 1024),
            duration_secs: Some(900.0),
            protocol: Some(StreamProtocol::Http),
            ..meta()
        };
        let first = s.select(&input, None, true);
        for _ in 0..10 {
            assert_eq!(s.select(&input, None, true), first);
        }
    }
}
