//! # fetchpool
//!
//! Clustered orchestration library for long-running media-fetch jobs.
//!
//! ## Design Philosophy
//!
//! fetchpool is designed to be:
//! - **Orchestration-only** - media extraction and accelerated transfers are
//!   delegated to injected collaborators, never performed in-crate
//! - **Cluster-native** - every node runs the same loops; failover needs no
//!   leader election, only a shared store with atomic primitives
//! - **Library-first** - no CLI or HTTP surface, purely a Rust crate for embedding
//! - **Event-driven** - consumers subscribe to events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use fetchpool::{Config, JobOptions, MemoryStore, Orchestrator, Tier};
//! # use fetchpool::{FetchEngine, FetchRequest, FetchOutcome, JobId, MediaMetadata, ProgressUpdate};
//! # struct MyEngine;
//! # #[async_trait::async_trait]
//! # impl FetchEngine for MyEngine {
//! #     async fn probe(&self, _: &str, _: &JobOptions) -> fetchpool::Result<MediaMetadata> {
//! #         Ok(MediaMetadata::default())
//! #     }
//! #     async fn fetch(
//! #         &self,
//! #         _: FetchRequest,
//! #         _: tokio::sync::mpsc::Sender<ProgressUpdate>,
//! #         _: tokio_util::sync::CancellationToken,
//! #     ) -> fetchpool::Result<FetchOutcome> {
//! #         Ok(FetchOutcome { payload: serde_json::json!({}) })
//! #     }
//! # }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(MemoryStore::new());
//!     let engine = Arc::new(MyEngine);
//!
//!     let orchestrator = Orchestrator::new(Config::default(), store, engine)?;
//!     let _handles = orchestrator.start_background_tasks();
//!
//!     // Subscribe to events
//!     let mut events = orchestrator.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let id = orchestrator
//!         .submit("https://media.example.com/watch?v=abc", JobOptions::default(), Tier::Standard)
//!         .await?;
//!     println!("submitted {id}");
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Admission control gate
pub mod admission;
/// Configuration types
pub mod config;
/// External engine and daemon boundaries
pub mod engine;
/// Error types
pub mod error;
/// Core orchestrator implementation (decomposed into focused submodules)
pub mod orchestrator;
/// System resource sampling
pub mod resource;
/// Retry backoff with jitter
pub mod retry;
/// Shared state store abstraction
pub mod store;
/// Download strategy selection
pub mod strategy;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use admission::AdmissionController;
pub use config::{
    AdmissionConfig, ClusterConfig, Config, ExecutionConfig, HealthConfig, NotificationConfig,
    RetryConfig, StrategyConfig,
};
pub use engine::{AcceleratorClient, FetchEngine, FetchOutcome, FetchRequest, HttpAcceleratorClient};
pub use error::{Error, ErrorCode, Result};
pub use orchestrator::Orchestrator;
pub use resource::{ResourceSampler, ResourceUsage, StaticResourceSampler, SystemResourceSampler};
pub use store::{MemoryStore, StateStore};
pub use strategy::{DownloadMethod, StrategyDecision, StrategyOverride, StrategySelector};
pub use types::{
    Alert, ClusterStatus, Event, Job, JobError, JobId, JobOptions, JobStatus, MediaMetadata,
    NodeHeartbeat, NodeStatus, ProgressUpdate, QueueStats, RecoveryAction, Severity,
    StreamProtocol, Tier, WebhookPayload,
};

/// Run the orchestrator until a termination signal, then shut down gracefully.
///
/// - **Unix:** listens for SIGTERM and SIGINT, falling back to Ctrl+C if
///   signal registration fails.
/// - **Windows/other:** listens for Ctrl+C.
pub async fn run_with_shutdown(orchestrator: Orchestrator) -> Result<()> {
    wait_for_signal().await;
    orchestrator.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Signal registration can fail in restricted environments (containers, tests)
    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("received SIGTERM"),
                _ = sigint.recv() => tracing::info!("received SIGINT"),
            }
        }
        _ => {
            tracing::warn!("could not register unix signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl+C");
    }
}
