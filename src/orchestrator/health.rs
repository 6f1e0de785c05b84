//! Auto-recovery health monitoring.
//!
//! Runs on a fixed period, independent of job traffic. Each cycle performs
//! four independent checks — resource pressure, queue/worker state,
//! dependency liveness, and application behavior — and raises alerts with
//! severity. Critical alerts notify on every cycle they recur; warnings
//! are deduplicated with a minimum resend interval. Every alert is
//! appended to the bounded history regardless of notification throttling.
//!
//! Corrective actions are bounded and non-destructive: a cleanup pass
//! under resource pressure, a store client reset on connectivity failure,
//! and re-enqueueing retry-eligible FAILED jobs when the failure rate is
//! elevated. The monitor never writes FAILED itself and never migrates
//! jobs — migration belongs exclusively to the failover coordinator.

use chrono::Utc;
use std::time::Instant;

use super::Orchestrator;
use crate::error::Result;
use crate::store::keys;
use crate::types::{Alert, Event, JobStatus, RecoveryAction, Severity};

impl Orchestrator {
    /// Start the health monitor background task.
    pub fn start_health_monitor(&self) -> tokio::task::JoinHandle<()> {
        let orchestrator = self.clone();
        let shutdown = self.shutdown_token.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(orchestrator.config.health.check_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        orchestrator.run_recovery_cycle().await;
                    }
                    _ = shutdown.cancelled() => {
                        break;
                    }
                }
            }

            tracing::debug!("health monitor stopped");
        })
    }

    /// Run one full health cycle: all four checks, alert processing, and
    /// corrective actions. Also the entry point for the admin surface's
    /// on-demand recovery trigger.
    pub async fn run_recovery_cycle(&self) {
        let mut alerts = Vec::new();

        let mut store_unreachable = false;
        self.check_resources(&mut alerts);
        if let Err(e) = self.check_queue_and_workers(&mut alerts).await {
            tracing::warn!(error = %e, "queue/worker check failed");
        }
        self.check_dependencies(&mut alerts, &mut store_unreachable)
            .await;
        self.check_application(&mut alerts);

        let resource_critical = alerts.iter().any(|a| {
            a.severity == Severity::Critical
                && matches!(
                    a.metric.as_str(),
                    "cpu_percent" | "memory_percent" | "disk_percent"
                )
        });
        let failure_rate_elevated = alerts.iter().any(|a| a.metric == "failure_rate");

        for alert in alerts {
            self.process_alert(alert).await;
        }

        // Corrective actions, each bounded per cycle.
        if store_unreachable {
            self.reset_store_client().await;
        }
        if resource_critical {
            self.maybe_run_cleanup().await;
        }
        if failure_rate_elevated {
            self.retry_eligible_failed_jobs().await;
        }
    }

    fn check_resources(&self, alerts: &mut Vec<Alert>) {
        let health = &self.config.health;
        let usage = match self.resources.sample() {
            Ok(usage) => usage,
            Err(e) => {
                alerts.push(alert(
                    "resource_sampling",
                    Severity::Warning,
                    0.0,
                    0.0,
                    format!("resource sampling failed: {e}"),
                ));
                return;
            }
        };

        let mut check = |metric: &str, value: f64, warning: f64, critical: f64| {
            if value >= critical {
                alerts.push(alert(
                    metric,
                    Severity::Critical,
                    value,
                    critical,
                    format!("{metric} at {value:.1}% (critical threshold {critical:.0}%)"),
                ));
            } else if value >= warning {
                alerts.push(alert(
                    metric,
                    Severity::Warning,
                    value,
                    warning,
                    format!("{metric} at {value:.1}% (warning threshold {warning:.0}%)"),
                ));
            }
        };

        check("cpu_percent", usage.cpu_percent, health.cpu_warning, health.cpu_critical);
        check(
            "memory_percent",
            usage.memory_percent,
            health.memory_warning,
            health.memory_critical,
        );
        check(
            "disk_percent",
            usage.disk_percent,
            health.disk_warning,
            health.disk_critical,
        );
    }

    async fn check_queue_and_workers(&self, alerts: &mut Vec<Alert>) -> Result<()> {
        let health = &self.config.health;

        let backlog = self.store.list_len(keys::PENDING_QUEUE).await?;
        if backlog >= health.backlog_critical {
            alerts.push(alert(
                "queue_backlog",
                Severity::Critical,
                backlog as f64,
                health.backlog_critical as f64,
                format!("pending backlog at {backlog} jobs"),
            ));
        } else if backlog >= health.backlog_warning {
            alerts.push(alert(
                "queue_backlog",
                Severity::Warning,
                backlog as f64,
                health.backlog_warning as f64,
                format!("pending backlog at {backlog} jobs"),
            ));
        }

        let cluster = self.cluster_status().await?;
        let workers = cluster.active_nodes;
        if workers == 0 {
            alerts.push(alert(
                "active_workers",
                Severity::Critical,
                0.0,
                1.0,
                "no active worker nodes".to_string(),
            ));
        } else if workers < health.min_workers {
            alerts.push(alert(
                "active_workers",
                Severity::Warning,
                workers as f64,
                health.min_workers as f64,
                format!("low worker count: {workers}"),
            ));
        }

        Ok(())
    }

    async fn check_dependencies(&self, alerts: &mut Vec<Alert>, store_unreachable: &mut bool) {
        let health = &self.config.health;

        let started = Instant::now();
        match self.store.ping().await {
            Ok(()) => {
                let latency = started.elapsed();
                if latency > health.store_latency_warning {
                    alerts.push(alert(
                        "store_latency",
                        Severity::Warning,
                        latency.as_secs_f64() * 1000.0,
                        health.store_latency_warning.as_secs_f64() * 1000.0,
                        format!("state store round-trip at {}ms", latency.as_millis()),
                    ));
                }
            }
            Err(e) => {
                *store_unreachable = true;
                alerts.push(alert(
                    "store_connectivity",
                    Severity::Critical,
                    0.0,
                    0.0,
                    format!("state store unreachable: {e}"),
                ));
            }
        }

        if self.config.strategy.accelerator_enabled
            && let Some(client) = &self.accelerator
            && let Err(e) = tokio::time::timeout(
                self.config.execution.rpc_timeout,
                client.ping(),
            )
            .await
            .unwrap_or_else(|_| Err(crate::error::Error::Transient("ping timed out".into())))
        {
            alerts.push(alert(
                "accelerator_daemon",
                Severity::Warning,
                0.0,
                0.0,
                format!("accelerated-download daemon unreachable: {e}"),
            ));
        }
    }

    fn check_application(&self, alerts: &mut Vec<Alert>) {
        let health = &self.config.health;
        let outcomes = match self.outcomes.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };

        // Too few samples to say anything meaningful.
        if outcomes.len() < 5 {
            return;
        }

        let failures = outcomes.iter().filter(|success| !**success).count();
        let rate = failures as f64 / outcomes.len() as f64;
        if rate >= health.failure_rate_warning {
            alerts.push(alert(
                "failure_rate",
                Severity::Warning,
                rate,
                health.failure_rate_warning,
                format!(
                    "job failure rate at {:.0}% over the last {} jobs",
                    rate * 100.0,
                    outcomes.len()
                ),
            ));
        }
    }

    /// Append to history and snapshot store unconditionally, then notify
    /// subject to severity rules: criticals every cycle they recur,
    /// warnings at most once per resend interval per metric.
    async fn process_alert(&self, alert: Alert) {
        self.push_alert_history(&alert).await;

        let notify = match alert.severity {
            Severity::Critical => true,
            Severity::Warning => {
                let resend = chrono::Duration::from_std(self.config.health.alert_resend_interval)
                    .unwrap_or_else(|_| chrono::Duration::seconds(300));
                let mut state = self.health_state.lock().await;
                match state.last_notified.get(&alert.metric) {
                    Some(last) if alert.timestamp.signed_duration_since(*last) < resend => false,
                    _ => {
                        state
                            .last_notified
                            .insert(alert.metric.clone(), alert.timestamp);
                        true
                    }
                }
            }
        };

        if notify {
            match alert.severity {
                Severity::Critical => {
                    tracing::error!(metric = %alert.metric, value = alert.value, message = %alert.message, "critical alert");
                }
                Severity::Warning => {
                    tracing::warn!(metric = %alert.metric, value = alert.value, message = %alert.message, "warning alert");
                }
            }
            self.emit_event(Event::AlertRaised { alert });
        }
    }

    /// Append an alert to the bounded in-memory ring and persist a TTL'd
    /// snapshot record.
    pub(crate) async fn push_alert_history(&self, alert: &Alert) {
        {
            let mut history = match self.alert_history.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            history.push_back(alert.clone());
            while history.len() > self.config.health.history_limit {
                history.pop_front();
            }
        }

        let key = keys::health_snapshot(alert.timestamp.timestamp_millis(), &alert.metric);
        match serde_json::to_string(alert) {
            Ok(serialized) => {
                if let Err(e) = self
                    .store
                    .put(&key, &serialized, Some(self.config.health.snapshot_ttl))
                    .await
                {
                    tracing::warn!(error = %e, "failed to persist health snapshot");
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize health snapshot");
            }
        }
    }

    async fn reset_store_client(&self) {
        match self.store.reset().await {
            Ok(()) => {
                tracing::info!("state store client reset");
                self.emit_event(Event::RecoveryActionTaken {
                    action: RecoveryAction::StoreReset,
                    detail: "state store client connections reset".to_string(),
                });
            }
            Err(e) => {
                tracing::error!(error = %e, "state store client reset failed");
            }
        }
    }

    /// Schedule a cleanup pass when resource pressure is critical, at most
    /// once per `cleanup_min_interval`.
    async fn maybe_run_cleanup(&self) {
        {
            let min_interval =
                chrono::Duration::from_std(self.config.health.cleanup_min_interval)
                    .unwrap_or_else(|_| chrono::Duration::seconds(300));
            let mut state = self.health_state.lock().await;
            if let Some(last) = state.last_cleanup
                && Utc::now().signed_duration_since(last) < min_interval
            {
                return;
            }
            state.last_cleanup = Some(Utc::now());
        }

        match self.cleanup_expired_records().await {
            Ok(purged) => {
                tracing::info!(purged, "cleanup pass completed");
                self.emit_event(Event::RecoveryActionTaken {
                    action: RecoveryAction::CleanupPass,
                    detail: format!("purged {purged} terminal job records"),
                });
            }
            Err(e) => {
                tracing::error!(error = %e, "cleanup pass failed");
            }
        }
    }

    /// Delete terminal job records older than the cleanup horizon.
    /// Non-destructive for anything still in flight.
    async fn cleanup_expired_records(&self) -> Result<usize> {
        let horizon = chrono::Duration::from_std(self.config.execution.cleanup_horizon)
            .unwrap_or_else(|_| chrono::Duration::hours(6));
        let now = Utc::now();
        let mut purged = 0;

        for (key, raw) in self.store.scan(keys::JOB_PREFIX).await? {
            let Ok(job) = serde_json::from_str::<crate::types::Job>(&raw) else {
                continue;
            };
            if !job.status.is_terminal() {
                continue;
            }
            let Some(completed_at) = job.completed_at else {
                continue;
            };
            if now.signed_duration_since(completed_at) > horizon
                && self.store.delete(&key).await?
            {
                purged += 1;
            }
        }

        Ok(purged)
    }

    /// Re-enqueue FAILED jobs still under `max_retries` through the
    /// lifecycle retry contract. Never forces a migration and never
    /// exceeds a job's retry budget.
    async fn retry_eligible_failed_jobs(&self) {
        let limit = self.config.health.retry_batch_limit;
        let entries = match self.store.scan(keys::JOB_PREFIX).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(error = %e, "failed to scan for retry-eligible jobs");
                return;
            }
        };

        let mut retried = 0;
        for (_, raw) in entries {
            if retried >= limit {
                break;
            }
            let Ok(job) = serde_json::from_str::<crate::types::Job>(&raw) else {
                continue;
            };
            if job.status != JobStatus::Failed
                || job.retry_count >= self.config.retry.max_retries
            {
                continue;
            }
            match self.retry(job.id).await {
                Ok(_) => retried += 1,
                Err(e) => {
                    tracing::debug!(job_id = %job.id, error = %e, "auto-retry skipped");
                }
            }
        }

        if retried > 0 {
            tracing::info!(retried, "re-enqueued failed jobs after elevated failure rate");
            self.emit_event(Event::RecoveryActionTaken {
                action: RecoveryAction::FailedJobRetry,
                detail: format!("re-enqueued {retried} failed jobs"),
            });
        }
    }
}

fn alert(metric: &str, severity: Severity, value: f64, threshold: f64, message: String) -> Alert {
    Alert {
        timestamp: Utc::now(),
        metric: metric.to_string(),
        severity,
        value,
        threshold,
        message,
    }
}
