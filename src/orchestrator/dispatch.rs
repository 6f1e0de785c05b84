//! Queue dispatcher — pops pending jobs from the shared queue, claims
//! ownership atomically, and spawns execution tasks.
//!
//! The claim is a compare-and-swap on the job record requiring an unowned
//! PENDING or RETRYING job; two nodes racing on the same queue entry can
//! never both win, which is what guarantees at-most-one concurrent
//! execution per job.

use chrono::Utc;
use std::str::FromStr;

use super::{ActiveJob, Orchestrator, execution};
use crate::store::keys;
use crate::types::{Event, JobId, JobStatus};

impl Orchestrator {
    /// Start the dispatcher background task.
    ///
    /// The loop continuously:
    /// 1. Pops the next job id from the shared pending queue (best-effort FIFO)
    /// 2. Acquires a permit from the concurrency limiter
    /// 3. Claims ownership of the job via compare-and-swap
    /// 4. Spawns an execution task for the claimed job
    pub fn start_dispatcher(&self) -> tokio::task::JoinHandle<()> {
        let orchestrator = self.clone();
        let shutdown = self.shutdown_token.clone();

        tokio::spawn(async move {
            loop {
                if shutdown.is_cancelled() {
                    break;
                }

                if orchestrator
                    .in_maintenance
                    .load(std::sync::atomic::Ordering::SeqCst)
                {
                    // Draining: leave queued work for the other nodes.
                    tokio::select! {
                        _ = tokio::time::sleep(orchestrator.config.execution.dispatch_poll_interval) => continue,
                        _ = shutdown.cancelled() => break,
                    }
                }

                let popped = orchestrator.store.list_pop(keys::PENDING_QUEUE).await;
                let raw_id = match popped {
                    Ok(Some(raw)) => raw,
                    Ok(None) => {
                        tokio::select! {
                            _ = tokio::time::sleep(orchestrator.config.execution.dispatch_poll_interval) => continue,
                            _ = shutdown.cancelled() => break,
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to poll pending queue");
                        tokio::select! {
                            _ = tokio::time::sleep(std::time::Duration::from_secs(1)) => continue,
                            _ = shutdown.cancelled() => break,
                        }
                    }
                };

                let Ok(id) = JobId::from_str(&raw_id) else {
                    tracing::warn!(entry = %raw_id, "dropping malformed queue entry");
                    continue;
                };

                let permit = tokio::select! {
                    permit = orchestrator.queue_state.concurrent_limit.clone().acquire_owned() => {
                        match permit {
                            Ok(p) => p,
                            Err(_) => break, // semaphore closed
                        }
                    }
                    _ = shutdown.cancelled() => {
                        // Not claimed yet; put the entry back for other nodes.
                        orchestrator
                            .store
                            .list_push(keys::PENDING_QUEUE, &raw_id)
                            .await
                            .ok();
                        break;
                    }
                };

                match orchestrator.claim_job(id).await {
                    Ok(Some(job)) => {
                        let attempt = job.attempt;
                        let cancel_token = tokio_util::sync::CancellationToken::new();

                        let ctx = execution::ExecutionContext {
                            orchestrator: orchestrator.clone(),
                            job,
                            attempt,
                            cancel: cancel_token.clone(),
                        };

                        // The task waits for registration so it cannot finish
                        // (and deregister) before its entry exists.
                        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel::<()>();
                        let handle = tokio::spawn(async move {
                            let _permit = permit;
                            ready_rx.await.ok();
                            execution::run_job(ctx).await;
                        });

                        orchestrator.queue_state.active_jobs.lock().await.insert(
                            id,
                            ActiveJob {
                                cancel_token,
                                abort: handle.abort_handle(),
                            },
                        );
                        ready_tx.send(()).ok();

                        orchestrator.emit_event(Event::JobStarted {
                            id,
                            node_id: orchestrator.node_id().to_string(),
                            attempt,
                        });
                    }
                    Ok(None) => {
                        // Claimed elsewhere, cancelled, or expired — skip.
                        drop(permit);
                    }
                    Err(e) => {
                        tracing::warn!(job_id = %id, error = %e, "failed to claim job");
                        drop(permit);
                    }
                }
            }

            tracing::debug!("dispatcher stopped");
        })
    }

    /// Atomically claim ownership of a queued job.
    ///
    /// Returns the claimed record, or `None` when the job is no longer
    /// claimable (picked up by another node, cancelled while queued, or
    /// its record expired).
    pub(crate) async fn claim_job(&self, id: JobId) -> crate::error::Result<Option<crate::types::Job>> {
        let node_id = self.node_id().to_string();

        let claimed = match self
            .update_job(id, |job| {
                let claimable = matches!(job.status, JobStatus::Pending | JobStatus::Retrying)
                    && job.owner_node.is_none();
                if !claimable {
                    return Ok(None);
                }
                let mut updated = job.clone();
                updated.status = JobStatus::Running;
                updated.owner_node = Some(node_id.clone());
                updated.attempt += 1;
                updated.started_at.get_or_insert_with(Utc::now);
                updated.stage = Some("initializing".to_string());
                updated.progress = Some(0.0);
                Ok(Some(updated))
            })
            .await
        {
            Ok(claimed) => claimed,
            // Expired records linger in the queue; treat as unclaimable.
            Err(crate::error::Error::NotFound(_)) => None,
            Err(e) => return Err(e),
        };

        if let Some(job) = &claimed {
            tracing::info!(
                job_id = %id,
                attempt = job.attempt,
                retry_count = job.retry_count,
                "job claimed for execution"
            );
        }
        Ok(claimed)
    }
}
