//! Job lifecycle management — submit, status, progress, completion,
//! failure, cancellation, and retry.
//!
//! This module is the sole writer of job-visible state: the failover
//! coordinator re-queues through the same transition path and the health
//! monitor requests retries through [`Orchestrator::retry`], so there is
//! exactly one place where status edges are enforced.
//!
//! All record mutations go through a compare-and-swap loop against the
//! shared state store; there is no cross-node lock. Late updates from a
//! migrated or cancelled attempt are rejected by an owner/generation
//! check, not by wall-clock heuristics.

use chrono::Utc;
use serde_json::Value;

use super::Orchestrator;
use crate::error::{Error, ErrorCode, Result};
use crate::retry::{IsRetryable, backoff_delay};
use crate::store::keys;
use crate::types::{Event, Job, JobError, JobId, JobOptions, JobStatus, Severity, Tier};

/// Attempts of the record CAS loop before giving up on contention
const CAS_ATTEMPTS: usize = 16;

impl Orchestrator {
    /// Submit a new media-fetch job.
    ///
    /// Fails with [`Error::AdmissionRejected`] when the tier's concurrency
    /// ceiling is met, and with [`Error::ShuttingDown`] while this node is
    /// draining. On success the job is persisted in PENDING and enqueued
    /// for dispatch on any node of the pool.
    ///
    /// Two submissions with identical URLs are independent jobs.
    pub async fn submit(&self, url: &str, options: JobOptions, tier: Tier) -> Result<JobId> {
        if !self
            .queue_state
            .accepting_new
            .load(std::sync::atomic::Ordering::SeqCst)
        {
            return Err(Error::ShuttingDown);
        }

        let parsed = url::Url::parse(url)?;

        self.admission.try_admit(tier).await?;

        let job = Job::new(parsed.to_string(), options, tier);
        let id = job.id;
        let serialized = serde_json::to_string(&job)?;

        let inserted = self
            .store
            .compare_and_swap(
                &keys::job(id),
                None,
                &serialized,
                Some(self.config.execution.job_ttl),
            )
            .await;

        match inserted {
            Ok(true) => {}
            Ok(false) => {
                // A v4 collision is practically unreachable; surface it
                // rather than overwrite someone else's record.
                self.admission.release(tier).await.ok();
                return Err(Error::Store(format!("job record {id} already exists")));
            }
            Err(e) => {
                self.admission.release(tier).await.ok();
                return Err(e);
            }
        }

        if let Err(e) = self
            .store
            .list_push(keys::PENDING_QUEUE, &id.to_string())
            .await
        {
            self.admission.release(tier).await.ok();
            self.store.delete(&keys::job(id)).await.ok();
            return Err(e);
        }

        tracing::info!(job_id = %id, url = %job.url, tier = tier.as_str(), "job submitted");
        self.emit_event(Event::JobQueued { id });

        Ok(id)
    }

    /// Get the current snapshot of a job.
    ///
    /// Fails with [`Error::NotFound`] if the record is absent or expired.
    pub async fn get_status(&self, id: JobId) -> Result<Job> {
        self.load_job(id).await
    }

    pub(crate) async fn load_job(&self, id: JobId) -> Result<Job> {
        let raw = self
            .store
            .get(&keys::job(id))
            .await?
            .ok_or_else(|| Error::NotFound(format!("job {id}")))?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Apply `mutate` to a job record through a compare-and-swap loop.
    ///
    /// `mutate` inspects the freshly loaded record and returns the updated
    /// record, or `None` to skip the write (guard rejected). Returns the
    /// written record, or `None` when the guard rejected it.
    pub(crate) async fn update_job<F>(&self, id: JobId, mut mutate: F) -> Result<Option<Job>>
    where
        F: FnMut(&Job) -> Result<Option<Job>>,
    {
        for _ in 0..CAS_ATTEMPTS {
            let key = keys::job(id);
            let raw = self
                .store
                .get(&key)
                .await?
                .ok_or_else(|| Error::NotFound(format!("job {id}")))?;
            let current: Job = serde_json::from_str(&raw)?;

            let Some(mut updated) = mutate(&current)? else {
                return Ok(None);
            };
            updated.updated_at = Utc::now();

            let serialized = serde_json::to_string(&updated)?;
            if self
                .store
                .compare_and_swap(
                    &key,
                    Some(&raw),
                    &serialized,
                    Some(self.config.execution.job_ttl),
                )
                .await?
            {
                return Ok(Some(updated));
            }
            // Lost the race against a concurrent writer; reload and retry.
        }

        Err(Error::Transient(format!(
            "job {id} record contention persisted across {CAS_ATTEMPTS} attempts"
        )))
    }

    /// Record an advisory progress update from the owning executor.
    ///
    /// A no-op when the job is already terminal or when the reporting
    /// attempt no longer owns the job (late update from migrated or
    /// cancelled work).
    pub(crate) async fn report_progress(
        &self,
        id: JobId,
        attempt: u32,
        percent: f32,
        stage: Option<&str>,
    ) -> Result<()> {
        let node_id = self.node_id().to_string();
        let percent = percent.clamp(0.0, 100.0);

        let written = self
            .update_job(id, |job| {
                if job.status.is_terminal()
                    || job.owner_node.as_deref() != Some(node_id.as_str())
                    || job.attempt != attempt
                {
                    return Ok(None);
                }
                let mut updated = job.clone();
                updated.progress = Some(percent);
                if let Some(stage) = stage {
                    updated.stage = Some(stage.to_string());
                }
                Ok(Some(updated))
            })
            .await?;

        if written.is_some() {
            self.emit_event(Event::JobProgress {
                id,
                percent,
                stage: stage.map(str::to_string),
            });
        }
        Ok(())
    }

    /// Mark a job this node is running as successfully completed.
    pub async fn complete(&self, id: JobId, result: Value) -> Result<Job> {
        let job = self.load_job(id).await?;
        self.complete_attempt(id, job.attempt, result)
            .await?
            .ok_or_else(|| {
                Error::InvalidState {
                    id: id.to_string(),
                    operation: "complete".to_string(),
                    current_state: job.status.as_str().to_string(),
                }
            })
    }

    /// Transition an attempt to SUCCESS. Returns `None` (and leaves the
    /// record untouched) when the attempt no longer owns the job.
    pub(crate) async fn complete_attempt(
        &self,
        id: JobId,
        attempt: u32,
        result: Value,
    ) -> Result<Option<Job>> {
        let node_id = self.node_id().to_string();

        let written = self
            .update_job(id, |job| {
                if !self.attempt_owns(job, &node_id, attempt)
                    || !job.status.can_transition_to(JobStatus::Success)
                {
                    return Ok(None);
                }
                let mut updated = job.clone();
                updated.status = JobStatus::Success;
                updated.owner_node = None;
                updated.progress = Some(100.0);
                updated.stage = None;
                updated.completed_at = Some(Utc::now());
                updated.result = Some(result.clone());
                Ok(Some(updated))
            })
            .await?;

        if let Some(job) = &written {
            tracing::info!(job_id = %id, attempt, "job completed");
            self.finalize_terminal(job, true).await;
            self.emit_event(Event::JobCompleted { id });
        } else {
            tracing::debug!(job_id = %id, attempt, "discarding stale completion");
        }
        Ok(written)
    }

    /// Mark a job this node is running as terminally failed.
    pub async fn fail(&self, id: JobId, code: ErrorCode, message: &str) -> Result<Job> {
        let job = self.load_job(id).await?;
        let node_id = self.node_id().to_string();
        let attempt = job.attempt;

        let written = self
            .update_job(id, |job| {
                if !self.attempt_owns(job, &node_id, attempt)
                    || !job.status.can_transition_to(JobStatus::Failed)
                {
                    return Ok(None);
                }
                Ok(Some(self.failed_record(job, code, message)))
            })
            .await?;

        match written {
            Some(job) => {
                self.finalize_terminal(&job, false).await;
                self.emit_event(Event::JobFailed {
                    id,
                    code,
                    error: message.to_string(),
                });
                Ok(job)
            }
            None => Err(Error::InvalidState {
                id: id.to_string(),
                operation: "fail".to_string(),
                current_state: job.status.as_str().to_string(),
            }),
        }
    }

    /// Handle an attempt's failure: auto-retry transient errors with
    /// backoff, fail everything else immediately.
    pub(crate) async fn fail_attempt(&self, id: JobId, attempt: u32, error: Error) -> Result<()> {
        let node_id = self.node_id().to_string();
        let code = error.code();
        let message = error.to_string();
        let retryable = error.is_retryable();
        let max_retries = self.config.retry.max_retries;

        let written = self
            .update_job(id, |job| {
                if !self.attempt_owns(job, &node_id, attempt) {
                    return Ok(None);
                }
                if retryable && job.retry_count < max_retries {
                    if !job.status.can_transition_to(JobStatus::Retrying) {
                        return Ok(None);
                    }
                    let mut updated = job.clone();
                    updated.status = JobStatus::Retrying;
                    updated.retry_count += 1;
                    updated.owner_node = None;
                    updated.stage = None;
                    updated.error = None;
                    return Ok(Some(updated));
                }
                if !job.status.can_transition_to(JobStatus::Failed) {
                    return Ok(None);
                }
                let (code, message) = if retryable {
                    (
                        ErrorCode::RetriesExhausted,
                        format!("{message} (after {} retries)", job.retry_count),
                    )
                } else {
                    (code, message.clone())
                };
                Ok(Some(self.failed_record(job, code, &message)))
            })
            .await?;

        let Some(job) = written else {
            tracing::debug!(job_id = %id, attempt, "discarding stale failure");
            return Ok(());
        };

        match job.status {
            JobStatus::Retrying => {
                // Delay scales with the retries consumed before this one.
                let delay = backoff_delay(&self.config.retry, job.retry_count - 1);
                tracing::warn!(
                    job_id = %id,
                    error = %message,
                    retry_count = job.retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "transient failure, retry scheduled"
                );
                self.schedule_enqueue(id, delay);
                self.emit_event(Event::JobRetryScheduled {
                    id,
                    retry_count: job.retry_count,
                    delay_ms: delay.as_millis() as u64,
                });
            }
            JobStatus::Failed => {
                let recorded = job.error.clone().unwrap_or(JobError {
                    code: ErrorCode::Unexpected,
                    message: message.clone(),
                });
                tracing::error!(
                    job_id = %id,
                    code = %recorded.code,
                    error = %recorded.message,
                    "job failed"
                );
                if recorded.code == ErrorCode::ResourceExhausted {
                    self.raise_job_alert(&job, &recorded).await;
                }
                self.finalize_terminal(&job, false).await;
                self.emit_event(Event::JobFailed {
                    id,
                    code: recorded.code,
                    error: recorded.message,
                });
            }
            _ => {}
        }
        Ok(())
    }

    /// Cancel a job.
    ///
    /// Idempotent: cancelling an already-terminal job is a no-op success.
    /// For a running job the owning executor is signalled cooperatively
    /// first; if it does not confirm within the grace period the execution
    /// is force-terminated and the job is marked CANCELLED regardless.
    pub async fn cancel(&self, id: JobId) -> Result<()> {
        let job = self.load_job(id).await?;

        if job.status.is_terminal() {
            return Ok(());
        }

        if job.status != JobStatus::Running {
            // Pending/Retrying: no owner to signal, cancel directly. The
            // dispatcher's claim guard skips cancelled queue entries.
            let written = self
                .update_job(id, |job| {
                    if !job.status.can_transition_to(JobStatus::Cancelled) {
                        return Ok(None);
                    }
                    Ok(Some(self.cancelled_record(job)))
                })
                .await?;
            if let Some(job) = written {
                tracing::info!(job_id = %id, "queued job cancelled");
                self.finalize_terminal(&job, false).await;
                self.emit_event(Event::JobCancelled { id, forced: false });
            }
            return Ok(());
        }

        // Cooperative phase: a store-backed flag for remote owners plus a
        // local token when we own the job ourselves.
        self.store
            .put(
                &keys::cancel_flag(id),
                &Utc::now().to_rfc3339(),
                Some(std::time::Duration::from_secs(3600)),
            )
            .await?;

        if job.owner_node.as_deref() == Some(self.node_id()) {
            let active = self.queue_state.active_jobs.lock().await;
            if let Some(active_job) = active.get(&id) {
                active_job.cancel_token.cancel();
            }
        }

        tracing::info!(job_id = %id, owner = ?job.owner_node, "cancellation requested");

        // Forced phase after the grace period.
        let orchestrator = self.clone();
        let grace = self.config.execution.cancel_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Err(e) = orchestrator.force_cancel(id).await {
                tracing::error!(job_id = %id, error = %e, "forced cancellation failed");
            }
        });

        Ok(())
    }

    /// Force-terminate a job whose executor did not confirm cancellation
    /// within the grace period.
    async fn force_cancel(&self, id: JobId) -> Result<()> {
        let job = match self.load_job(id).await {
            Ok(job) => job,
            // Record expired in the meantime; nothing left to cancel.
            Err(Error::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        };
        if job.status.is_terminal() {
            return Ok(());
        }

        // Abort the local task if this node still runs it.
        {
            let mut active = self.queue_state.active_jobs.lock().await;
            if let Some(active_job) = active.remove(&id) {
                active_job.abort.abort();
            }
        }

        let written = self
            .update_job(id, |job| {
                if !job.status.can_transition_to(JobStatus::Cancelled) {
                    return Ok(None);
                }
                Ok(Some(self.cancelled_record(job)))
            })
            .await?;

        if let Some(job) = written {
            tracing::warn!(job_id = %id, "executor did not confirm within grace period, forced cancellation");
            self.finalize_terminal(&job, false).await;
            self.emit_event(Event::JobCancelled { id, forced: true });
        }
        Ok(())
    }

    /// Transition to CANCELLED from the executor's cooperative confirmation.
    pub(crate) async fn cancel_attempt(&self, id: JobId, attempt: u32) -> Result<()> {
        let node_id = self.node_id().to_string();
        let written = self
            .update_job(id, |job| {
                if !self.attempt_owns(job, &node_id, attempt)
                    || !job.status.can_transition_to(JobStatus::Cancelled)
                {
                    return Ok(None);
                }
                Ok(Some(self.cancelled_record(job)))
            })
            .await?;

        if let Some(job) = written {
            tracing::info!(job_id = %id, attempt, "job cancelled cooperatively");
            self.finalize_terminal(&job, false).await;
            self.emit_event(Event::JobCancelled { id, forced: false });
        }
        Ok(())
    }

    /// Retry a FAILED job.
    ///
    /// Only callable on FAILED jobs with retries remaining; transitions to
    /// RETRYING and re-enqueues after an exponential backoff delay.
    pub async fn retry(&self, id: JobId) -> Result<Job> {
        let written = self
            .update_job(id, |job| {
                if job.status != JobStatus::Failed {
                    return Err(Error::InvalidState {
                        id: id.to_string(),
                        operation: "retry".to_string(),
                        current_state: job.status.as_str().to_string(),
                    });
                }
                if job.retry_count >= self.config.retry.max_retries {
                    return Err(Error::InvalidState {
                        id: id.to_string(),
                        operation: "retry".to_string(),
                        current_state: format!(
                            "failed with {} of {} retries consumed",
                            job.retry_count, self.config.retry.max_retries
                        ),
                    });
                }
                let mut updated = job.clone();
                updated.status = JobStatus::Retrying;
                updated.retry_count += 1;
                updated.owner_node = None;
                updated.completed_at = None;
                updated.error = None;
                updated.result = None;
                updated.stage = None;
                Ok(Some(updated))
            })
            .await?
            // The closure either errors or returns a record.
            .ok_or_else(|| Error::Other(format!("retry of job {id} produced no record")))?;

        // The failure released the admission slot; re-occupy it.
        self.admission.readmit(written.tier).await?;

        let delay = backoff_delay(&self.config.retry, written.retry_count - 1);
        tracing::info!(
            job_id = %id,
            retry_count = written.retry_count,
            delay_ms = delay.as_millis() as u64,
            "retry scheduled"
        );
        self.schedule_enqueue(id, delay);
        self.emit_event(Event::JobRetryScheduled {
            id,
            retry_count: written.retry_count,
            delay_ms: delay.as_millis() as u64,
        });

        Ok(written)
    }

    /// Push a job back onto the shared pending queue after `delay`.
    pub(crate) fn schedule_enqueue(&self, id: JobId, delay: std::time::Duration) {
        let orchestrator = self.clone();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if let Err(e) = orchestrator
                .store
                .list_push(keys::PENDING_QUEUE, &id.to_string())
                .await
            {
                tracing::error!(job_id = %id, error = %e, "failed to re-enqueue job");
            }
        });
    }

    /// Whether `attempt` on this node still owns the job
    fn attempt_owns(&self, job: &Job, node_id: &str, attempt: u32) -> bool {
        job.owner_node.as_deref() == Some(node_id) && job.attempt == attempt
    }

    fn failed_record(&self, job: &Job, code: ErrorCode, message: &str) -> Job {
        let mut updated = job.clone();
        updated.status = JobStatus::Failed;
        updated.owner_node = None;
        updated.stage = None;
        updated.completed_at = Some(Utc::now());
        updated.error = Some(JobError {
            code,
            message: message.to_string(),
        });
        updated
    }

    fn cancelled_record(&self, job: &Job) -> Job {
        let mut updated = job.clone();
        updated.status = JobStatus::Cancelled;
        updated.owner_node = None;
        updated.stage = None;
        updated.completed_at = Some(Utc::now());
        updated
    }

    /// Housekeeping shared by every terminal transition: release the
    /// admission slot, feed the failure-rate window, drop the cancel flag,
    /// and deliver the webhook.
    pub(crate) async fn finalize_terminal(&self, job: &Job, success: bool) {
        if let Err(e) = self.admission.release(job.tier).await {
            tracing::error!(job_id = %job.id, error = %e, "failed to release admission slot");
        }
        if job.status != JobStatus::Cancelled {
            self.record_outcome(success);
        }
        self.store.delete(&keys::cancel_flag(job.id)).await.ok();
        self.trigger_webhook(job);
    }

    /// Raise a critical alert for a resource-exhausted job failure.
    async fn raise_job_alert(&self, job: &Job, error: &JobError) {
        let alert = crate::types::Alert {
            timestamp: Utc::now(),
            metric: "job_resource_exhausted".to_string(),
            severity: Severity::Critical,
            value: 1.0,
            threshold: 0.0,
            message: format!("job {} failed: {}", job.id, error.message),
        };
        self.push_alert_history(&alert).await;
        self.emit_event(Event::AlertRaised { alert });
    }
}
