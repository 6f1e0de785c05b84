//! Terminal-state webhook notifications.
//!
//! If a submission configured a webhook target, it is invoked once when
//! the job reaches a terminal state with `{job_id, status, result|error}`.
//! Delivery is best-effort: a small bounded number of attempts, fire and
//! forget, never affecting job state.

use super::Orchestrator;
use crate::types::{Event, Job, WebhookPayload};

impl Orchestrator {
    /// Deliver the terminal-state webhook for `job`, if one is configured.
    ///
    /// Spawns an async task (fire and forget) so delivery never blocks the
    /// lifecycle path.
    pub(crate) fn trigger_webhook(&self, job: &Job) {
        let Some(url) = job.options.webhook_url.clone() else {
            return;
        };

        let payload = WebhookPayload {
            job_id: job.id,
            status: job.status,
            result: job.result.clone(),
            error: job.error.clone(),
            timestamp: chrono::Utc::now().timestamp(),
        };

        let event_tx = self.event_tx.clone();
        let timeout = self.config.notifications.webhook_timeout;
        let attempts = self.config.notifications.webhook_attempts.max(1);
        let retry_delay = self.config.notifications.webhook_retry_delay;

        tokio::spawn(async move {
            let client = match reqwest::Client::builder().timeout(timeout).build() {
                Ok(client) => client,
                Err(e) => {
                    tracing::error!(error = %e, "failed to build webhook client");
                    return;
                }
            };

            let mut last_error = String::new();
            for attempt in 1..=attempts {
                match client.post(&url).json(&payload).send().await {
                    Ok(response) if response.status().is_success() => {
                        tracing::debug!(url = %url, attempt, "webhook delivered");
                        return;
                    }
                    Ok(response) => {
                        last_error = format!("webhook returned status {}", response.status());
                        tracing::warn!(url = %url, attempt, error = %last_error, "webhook attempt failed");
                    }
                    Err(e) => {
                        last_error = format!("failed to send webhook: {e}");
                        tracing::warn!(url = %url, attempt, error = %last_error, "webhook attempt failed");
                    }
                }

                if attempt < attempts {
                    tokio::time::sleep(retry_delay).await;
                }
            }

            event_tx
                .send(Event::WebhookFailed {
                    url,
                    error: last_error,
                })
                .ok();
        });
    }
}
