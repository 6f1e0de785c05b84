//! Cluster heartbeat publication and failover migration.
//!
//! Every node runs the same coordinator loop: publish its own TTL'd
//! heartbeat, scan all heartbeats, classify nodes as fresh or stale, and
//! migrate the jobs of every newly-stale node back to the pending pool.
//! Absence of a fresh heartbeat is the sole failure signal; there is no
//! explicit "down" announcement.
//!
//! Migration is at-most-once per stale node: the coordinator that wins the
//! atomic heartbeat delete proceeds, racing coordinators observe the key
//! already gone and skip.

use chrono::Utc;

use super::Orchestrator;
use crate::error::Result;
use crate::store::keys;
use crate::types::{ClusterStatus, Event, JobStatus, NodeHeartbeat, NodeStatus};

impl Orchestrator {
    /// Start the heartbeat/failover coordinator background task.
    pub fn start_heartbeat_coordinator(&self) -> tokio::task::JoinHandle<()> {
        let orchestrator = self.clone();
        let shutdown = self.shutdown_token.clone();

        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(orchestrator.config.cluster.heartbeat_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        orchestrator.run_heartbeat_cycle().await;
                    }
                    _ = shutdown.cancelled() => {
                        break;
                    }
                }
            }

            tracing::debug!("heartbeat coordinator stopped");
        })
    }

    /// One coordinator cycle: publish, scan, migrate, aggregate.
    pub(crate) async fn run_heartbeat_cycle(&self) {
        if let Err(e) = self.publish_heartbeat().await {
            tracing::error!(error = %e, "failed to publish heartbeat");
        }
        if let Err(e) = self.scan_and_migrate().await {
            tracing::error!(error = %e, "failover scan failed");
        }
    }

    /// Publish this node's liveness record with TTL = 2 x heartbeat_interval.
    pub(crate) async fn publish_heartbeat(&self) -> Result<()> {
        let status = if self
            .in_maintenance
            .load(std::sync::atomic::Ordering::SeqCst)
        {
            NodeStatus::Maintenance
        } else {
            NodeStatus::Active
        };

        let load = match self.resources.sample() {
            Ok(usage) => usage.cpu_percent as f32,
            Err(_) => 0.0,
        };

        let heartbeat = NodeHeartbeat {
            node_id: self.node_id().to_string(),
            timestamp: Utc::now(),
            status,
            load,
            active_job_count: self.queue_state.active_jobs.lock().await.len() as u32,
        };

        self.store
            .put(
                &keys::heartbeat(self.node_id()),
                &serde_json::to_string(&heartbeat)?,
                Some(self.config.cluster.heartbeat_interval * 2),
            )
            .await?;

        tracing::debug!(node_id = %self.node_id(), load, "heartbeat published");
        Ok(())
    }

    /// Scan all heartbeats, migrate jobs off newly-stale nodes, and rebuild
    /// the cluster status aggregate.
    pub(crate) async fn scan_and_migrate(&self) -> Result<()> {
        let entries = self.store.scan(keys::HEARTBEAT_PREFIX).await?;
        let now = Utc::now();
        let failover_timeout =
            chrono::Duration::from_std(self.config.cluster.failover_timeout)
                .unwrap_or_else(|_| chrono::Duration::seconds(120));

        let mut fresh = Vec::new();
        let mut stale = Vec::new();

        for (key, raw) in entries {
            let heartbeat: NodeHeartbeat = match serde_json::from_str(&raw) {
                Ok(hb) => hb,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "skipping unparsable heartbeat");
                    continue;
                }
            };

            if now.signed_duration_since(heartbeat.timestamp) > failover_timeout {
                stale.push(heartbeat.node_id);
            } else {
                fresh.push(heartbeat);
            }
        }

        for node_id in &stale {
            // Atomic delete-then-migrate: only the coordinator that observes
            // the key is elected to migrate, so racing coordinators cannot
            // double-migrate the same node.
            match self.store.delete(&keys::heartbeat(node_id)).await {
                Ok(true) => {
                    tracing::warn!(node_id = %node_id, "stale node detected, migrating its jobs");
                    match self.migrate_jobs_from(node_id).await {
                        Ok(migrated) => {
                            self.emit_event(Event::NodeStale {
                                node_id: node_id.clone(),
                                migrated_jobs: migrated,
                            });
                        }
                        Err(e) => {
                            tracing::error!(node_id = %node_id, error = %e, "job migration failed");
                        }
                    }
                }
                Ok(false) => {
                    tracing::debug!(node_id = %node_id, "stale node already handled by another coordinator");
                }
                Err(e) => {
                    tracing::error!(node_id = %node_id, error = %e, "failed to delete stale heartbeat");
                }
            }
        }

        self.update_cluster_status(fresh, stale).await
    }

    /// Move every job owned by `failed_node` back to the pending pool.
    ///
    /// The transition is Running -> Pending with ownership cleared and a
    /// migration annotation; it is not a terminal state change and never
    /// counts as a user-visible failure.
    pub(crate) async fn migrate_jobs_from(&self, failed_node: &str) -> Result<usize> {
        let entries = self.store.scan(keys::JOB_PREFIX).await?;
        let mut migrated = 0;

        for (key, raw) in entries {
            let job: crate::types::Job = match serde_json::from_str(&raw) {
                Ok(job) => job,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "skipping unparsable job record");
                    continue;
                }
            };

            if job.owner_node.as_deref() != Some(failed_node) || job.status.is_terminal() {
                continue;
            }

            let id = job.id;
            let requeued = self
                .update_job(id, |job| {
                    if job.owner_node.as_deref() != Some(failed_node)
                        || !job.status.can_transition_to(JobStatus::Pending)
                    {
                        return Ok(None);
                    }
                    let mut updated = job.clone();
                    updated.status = JobStatus::Pending;
                    updated.owner_node = None;
                    updated.stage = None;
                    updated.progress = None;
                    updated.migration_note =
                        Some(format!("migrated from failed node {failed_node}"));
                    Ok(Some(updated))
                })
                .await?;

            if requeued.is_some() {
                self.schedule_enqueue(id, std::time::Duration::ZERO);
                self.emit_event(Event::JobMigrated {
                    id,
                    from_node: failed_node.to_string(),
                });
                tracing::info!(job_id = %id, from_node = %failed_node, "job migrated");
                migrated += 1;
            }
        }

        tracing::info!(node_id = %failed_node, migrated, "stale node handled");
        Ok(migrated)
    }

    async fn update_cluster_status(
        &self,
        fresh: Vec<NodeHeartbeat>,
        stale: Vec<String>,
    ) -> Result<()> {
        let status = ClusterStatus {
            timestamp: Utc::now(),
            active_nodes: fresh.len(),
            stale_nodes: stale.len(),
            total_nodes: fresh.len() + stale.len(),
            nodes: fresh,
            stale_node_ids: stale,
        };

        self.store
            .put(
                keys::CLUSTER_STATUS,
                &serde_json::to_string(&status)?,
                Some(self.config.cluster.cluster_status_ttl),
            )
            .await
    }

    /// The last aggregated cluster snapshot.
    ///
    /// On a cold start or a single node with no aggregate yet, returns a
    /// synthesized single-node-healthy status instead of erroring — a
    /// deliberate degrade-to-simple behavior, not silent failure.
    pub async fn cluster_status(&self) -> Result<ClusterStatus> {
        if let Some(raw) = self.store.get(keys::CLUSTER_STATUS).await?
            && let Ok(status) = serde_json::from_str::<ClusterStatus>(&raw)
        {
            return Ok(status);
        }

        let own = NodeHeartbeat {
            node_id: self.node_id().to_string(),
            timestamp: Utc::now(),
            status: NodeStatus::Active,
            load: 0.0,
            active_job_count: self.queue_state.active_jobs.lock().await.len() as u32,
        };
        Ok(ClusterStatus {
            timestamp: Utc::now(),
            active_nodes: 1,
            stale_nodes: 0,
            total_nodes: 1,
            nodes: vec![own],
            stale_node_ids: Vec::new(),
        })
    }

    /// Enter maintenance: stop accepting submissions and dispatch, and
    /// publish a maintenance heartbeat so other coordinators see an
    /// orderly drain instead of a failure.
    pub async fn enter_maintenance(&self) {
        self.in_maintenance
            .store(true, std::sync::atomic::Ordering::SeqCst);
        self.queue_state
            .accepting_new
            .store(false, std::sync::atomic::Ordering::SeqCst);

        if let Err(e) = self.publish_maintenance_heartbeat().await {
            tracing::error!(error = %e, "failed to publish maintenance heartbeat");
        }
        tracing::info!(node_id = %self.node_id(), "entered maintenance mode");
    }

    async fn publish_maintenance_heartbeat(&self) -> Result<()> {
        let heartbeat = NodeHeartbeat {
            node_id: self.node_id().to_string(),
            timestamp: Utc::now(),
            status: NodeStatus::Maintenance,
            load: 0.0,
            active_job_count: self.queue_state.active_jobs.lock().await.len() as u32,
        };
        self.store
            .put(
                &keys::heartbeat(self.node_id()),
                &serde_json::to_string(&heartbeat)?,
                Some(std::time::Duration::from_secs(300)),
            )
            .await
    }

    /// Drain for shutdown: enter maintenance, wait (bounded) for owned
    /// jobs to reach a terminal state, then delete the own heartbeat so
    /// departure does not look like a failure and trigger a migration
    /// storm.
    pub(crate) async fn graceful_drain(&self) {
        self.enter_maintenance().await;

        let deadline = tokio::time::Instant::now() + self.config.cluster.shutdown_grace;
        loop {
            let active = self.queue_state.active_jobs.lock().await.len();
            if active == 0 {
                tracing::info!("all owned jobs finished, safe to shut down");
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(active, "shutdown grace period elapsed with jobs still running");
                break;
            }
            tracing::info!(active, "waiting for owned jobs to finish");
            tokio::time::sleep(
                self.config
                    .cluster
                    .shutdown_poll
                    .min(deadline.duration_since(tokio::time::Instant::now())),
            )
            .await;
        }

        if let Err(e) = self.store.delete(&keys::heartbeat(self.node_id())).await {
            tracing::error!(error = %e, "failed to delete own heartbeat during shutdown");
        }
    }
}
