//! Execution of a single claimed job attempt.
//!
//! One attempt probes metadata, selects a download method, runs the
//! transfer under the wall-clock ceiling, and forwards typed progress
//! events from the engine's bounded channel into the lifecycle manager.
//! A method-specific failure triggers exactly one runtime fallback to the
//! standard method within the same attempt, without consuming a retry.

use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::Orchestrator;
use crate::engine::{FetchOutcome, FetchRequest};
use crate::error::{Error, Result};
use crate::store::keys;
use crate::strategy::DownloadMethod;
use crate::types::{Event, Job, JobId, MediaMetadata};

/// Everything one execution task needs
pub(crate) struct ExecutionContext {
    /// Orchestrator handle (cheap clone, all fields Arc-wrapped)
    pub(crate) orchestrator: Orchestrator,
    /// The claimed job snapshot
    pub(crate) job: Job,
    /// Execution generation of the claim
    pub(crate) attempt: u32,
    /// Cooperative cancellation signal
    pub(crate) cancel: CancellationToken,
}

/// Run one job attempt to a terminal or retrying transition.
pub(crate) async fn run_job(ctx: ExecutionContext) {
    let id = ctx.job.id;
    let orchestrator = ctx.orchestrator.clone();

    // Watch the store-backed cancellation flag so cancel requests from
    // other nodes reach this executor cooperatively.
    let flag_watcher = spawn_cancel_flag_watcher(
        orchestrator.clone(),
        id,
        ctx.cancel.clone(),
    );

    // Cooperative cancellation: the engine is expected to observe its token
    // and return promptly. An engine that never does is force-terminated by
    // the lifecycle manager's grace-period task aborting this whole task.
    let ceiling = orchestrator.config.execution.job_timeout;
    let attempt_result = tokio::time::timeout(ceiling, execute_attempt(&ctx)).await;

    flag_watcher.abort();
    orchestrator
        .queue_state
        .active_jobs
        .lock()
        .await
        .remove(&id);

    let result = match attempt_result {
        Ok(Ok(outcome)) => orchestrator
            .complete_attempt(id, ctx.attempt, outcome.payload)
            .await
            .map(|_| ()),
        // The executor stopped in response to a cancellation request
        Ok(Err(_)) if ctx.cancel.is_cancelled() => {
            orchestrator.cancel_attempt(id, ctx.attempt).await
        }
        Ok(Err(error)) => orchestrator.fail_attempt(id, ctx.attempt, error).await,
        Err(_elapsed) => {
            orchestrator
                .fail_attempt(
                    id,
                    ctx.attempt,
                    Error::Timeout {
                        limit_secs: ceiling.as_secs(),
                    },
                )
                .await
        }
    };

    if let Err(e) = result {
        tracing::error!(job_id = %id, attempt = ctx.attempt, error = %e, "failed to record attempt outcome");
    }
}

async fn execute_attempt(ctx: &ExecutionContext) -> Result<FetchOutcome> {
    let orchestrator = &ctx.orchestrator;
    let id = ctx.job.id;
    let rpc_timeout = orchestrator.config.execution.rpc_timeout;

    // Metadata extraction (suspend point, short per-call timeout)
    let meta = with_rpc_timeout(
        rpc_timeout,
        orchestrator.engine.probe(&ctx.job.url, &ctx.job.options),
        "metadata probe",
    )
    .await?;

    let daemon_reachable = daemon_reachable(orchestrator, rpc_timeout).await;
    let decision =
        orchestrator
            .selector
            .select(&meta, ctx.job.options.strategy, daemon_reachable);

    tracing::info!(
        job_id = %id,
        method = %decision.method,
        reason = %decision.reason,
        "download method selected"
    );

    record_method(ctx, decision.method).await?;

    match run_transfer(ctx, &meta, decision.method).await {
        Ok(outcome) => Ok(outcome),
        Err(error)
            if error.is_method_specific() && decision.method != DownloadMethod::Standard =>
        {
            // One-shot runtime fallback, local to this attempt.
            tracing::warn!(
                job_id = %id,
                method = %decision.method,
                error = %error,
                "method failed, falling back to standard"
            );
            orchestrator.emit_event(Event::MethodFallback {
                id,
                from: decision.method,
            });
            record_method(ctx, DownloadMethod::Standard).await?;
            run_transfer(ctx, &meta, DownloadMethod::Standard).await
        }
        Err(error) => Err(error),
    }
}

/// Execute the transfer, forwarding typed progress events from the
/// engine's bounded channel into the store through the lifecycle manager.
async fn run_transfer(
    ctx: &ExecutionContext,
    _meta: &MediaMetadata,
    method: DownloadMethod,
) -> Result<FetchOutcome> {
    let orchestrator = ctx.orchestrator.clone();
    let id = ctx.job.id;
    let attempt = ctx.attempt;

    let (progress_tx, mut progress_rx) =
        tokio::sync::mpsc::channel(orchestrator.config.execution.progress_buffer);

    let forwarder = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            while let Some(update) = progress_rx.recv().await {
                let update: crate::types::ProgressUpdate = update;
                if let Err(e) = orchestrator
                    .report_progress(id, attempt, update.percent, update.stage.as_deref())
                    .await
                {
                    tracing::warn!(job_id = %id, error = %e, "failed to record progress");
                }
            }
        })
    };

    let request = FetchRequest {
        job_id: id,
        url: ctx.job.url.clone(),
        options: ctx.job.options.clone(),
        method,
    };

    let result = orchestrator
        .engine
        .fetch(request, progress_tx, ctx.cancel.child_token())
        .await;

    // progress_tx dropped with the fetch call; drain the forwarder.
    forwarder.await.ok();

    result
}

async fn record_method(ctx: &ExecutionContext, method: DownloadMethod) -> Result<()> {
    let node_id = ctx.orchestrator.node_id().to_string();
    let attempt = ctx.attempt;
    ctx.orchestrator
        .update_job(ctx.job.id, |job| {
            if job.status.is_terminal()
                || job.owner_node.as_deref() != Some(node_id.as_str())
                || job.attempt != attempt
            {
                return Ok(None);
            }
            let mut updated = job.clone();
            updated.method = Some(method);
            updated.stage = Some("downloading".to_string());
            Ok(Some(updated))
        })
        .await?;
    Ok(())
}

/// Whether the accelerated daemon is configured, enabled, and answering.
async fn daemon_reachable(orchestrator: &Orchestrator, rpc_timeout: Duration) -> bool {
    if !orchestrator.config.strategy.accelerator_enabled {
        return false;
    }
    let Some(client) = &orchestrator.accelerator else {
        return false;
    };
    match tokio::time::timeout(rpc_timeout, client.ping()).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "accelerator daemon unreachable");
            false
        }
        Err(_) => {
            tracing::debug!("accelerator daemon ping timed out");
            false
        }
    }
}

/// Wrap an engine RPC with the short per-call timeout, classifying the
/// elapsed case as transient.
async fn with_rpc_timeout<T>(
    rpc_timeout: Duration,
    future: impl std::future::Future<Output = Result<T>>,
    what: &str,
) -> Result<T> {
    match tokio::time::timeout(rpc_timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(Error::Transient(format!(
            "{what} timed out after {rpc_timeout:?}"
        ))),
    }
}

/// Poll the store-backed cancellation flag and fire the local token when
/// it appears. Lets cancel requests issued on other nodes reach this
/// executor without any direct connection.
fn spawn_cancel_flag_watcher(
    orchestrator: Orchestrator,
    id: JobId,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(orchestrator.config.execution.cancel_poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            if cancel.is_cancelled() {
                break;
            }
            // The execution task deregisters itself (or is deregistered by a
            // forced cancellation) when it ends; stop watching with it.
            if !orchestrator
                .queue_state
                .active_jobs
                .lock()
                .await
                .contains_key(&id)
            {
                break;
            }
            match orchestrator.store.get(&keys::cancel_flag(id)).await {
                Ok(Some(_)) => {
                    tracing::debug!(job_id = %id, "cancellation flag observed");
                    cancel.cancel();
                    break;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(job_id = %id, error = %e, "cancel flag poll failed");
                }
            }
        }
    })
}
