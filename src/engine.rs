//! External collaborator seams: the media-extraction engine and the
//! accelerated-download daemon.
//!
//! The orchestration core never fetches media itself. It probes metadata
//! and delegates transfers through [`FetchEngine`], and checks the optional
//! accelerated daemon's liveness through [`AcceleratorClient`]. Both are
//! trait objects injected at startup, which keeps the engines swappable and
//! lets tests script outcomes without any network.

use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::strategy::DownloadMethod;
use crate::types::{JobId, JobOptions, MediaMetadata, ProgressUpdate};

/// One transfer request handed to the engine
#[derive(Clone, Debug)]
pub struct FetchRequest {
    /// Job being executed
    pub job_id: JobId,
    /// Media URL
    pub url: String,
    /// Pass-through options from submission
    pub options: JobOptions,
    /// Download method chosen by the strategy selector
    pub method: DownloadMethod,
}

/// Result of a completed transfer: an opaque payload recorded on the job.
#[derive(Clone, Debug)]
pub struct FetchOutcome {
    /// Engine-provided result (filenames, title, sizes, ...)
    pub payload: serde_json::Value,
}

/// The media-extraction engine boundary.
///
/// Implementations wrap the actual extraction tool. Errors must be
/// classified through the crate taxonomy: [`Error::Transient`] for
/// network-class failures, [`Error::Permanent`] for missing/forbidden
/// media, and [`Error::MethodFailed`] when the requested download method
/// itself failed (which triggers the executor's one-shot fallback to the
/// standard method).
#[async_trait]
pub trait FetchEngine: Send + Sync {
    /// Extract media metadata without downloading.
    async fn probe(&self, url: &str, options: &JobOptions) -> Result<MediaMetadata>;

    /// Execute the transfer for `request`, reporting progress over the
    /// bounded `progress` channel and aborting promptly when `cancel` fires.
    async fn fetch(
        &self,
        request: FetchRequest,
        progress: tokio::sync::mpsc::Sender<ProgressUpdate>,
        cancel: CancellationToken,
    ) -> Result<FetchOutcome>;
}

/// Liveness boundary of the optional accelerated-download daemon.
#[async_trait]
pub trait AcceleratorClient: Send + Sync {
    /// Probe daemon liveness. An error means unreachable.
    async fn ping(&self) -> Result<()>;
}

/// [`AcceleratorClient`] over the daemon's JSON-RPC endpoint.
///
/// Uses a short per-call timeout independent of any job-level ceiling.
pub struct HttpAcceleratorClient {
    endpoint: url::Url,
    client: reqwest::Client,
}

impl HttpAcceleratorClient {
    /// Create a client for the daemon RPC endpoint
    pub fn new(endpoint: url::Url, rpc_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(rpc_timeout)
            .build()
            .map_err(Error::Network)?;
        Ok(Self { endpoint, client })
    }
}

#[async_trait]
impl AcceleratorClient for HttpAcceleratorClient {
    async fn ping(&self) -> Result<()> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": "fetchpool-ping",
            "method": "aria2.getVersion",
        });

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::Transient(format!(
                "accelerator daemon returned status {}",
                response.status()
            )))
        }
    }
}
