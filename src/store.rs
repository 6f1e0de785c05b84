//! Shared state store abstraction
//!
//! The orchestration core treats the cluster-wide key-value store as an
//! external collaborator and consumes only a narrow primitive contract:
//! get/put with TTL expiry, atomic compare-and-swap, delete that reports
//! whether the key existed, prefix scans, list push/pop, and atomic
//! counters. Job records, heartbeats, the pending queue, cluster status,
//! and alert history all live behind this trait.
//!
//! [`MemoryStore`] is a TTL-aware in-process implementation used both as
//! the single-node default and as the test double; production deployments
//! implement [`StateStore`] over their network store of choice.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// Store key layout used by the orchestration core
pub mod keys {
    use crate::types::{JobId, Tier};

    /// Key of a job record
    pub fn job(id: JobId) -> String {
        format!("job:{id}")
    }

    /// Prefix of all job records
    pub const JOB_PREFIX: &str = "job:";

    /// Key of a node's heartbeat record
    pub fn heartbeat(node_id: &str) -> String {
        format!("heartbeat:{node_id}")
    }

    /// Prefix of all heartbeat records
    pub const HEARTBEAT_PREFIX: &str = "heartbeat:";

    /// Key of the aggregated cluster status
    pub const CLUSTER_STATUS: &str = "cluster:status";

    /// Key of the shared pending-job queue
    pub const PENDING_QUEUE: &str = "queue:pending";

    /// Key of a tier's in-flight admission counter
    pub fn admission(tier: Tier) -> String {
        format!("admission:{}", tier.as_str())
    }

    /// Key of a persisted health snapshot
    pub fn health_snapshot(unix_ms: i64, metric: &str) -> String {
        format!("health_snapshot:{unix_ms}:{metric}")
    }

    /// Prefix of all health snapshots
    pub const HEALTH_SNAPSHOT_PREFIX: &str = "health_snapshot:";

    /// Key of a job's cooperative cancellation flag
    pub fn cancel_flag(id: JobId) -> String {
        format!("cancel:{id}")
    }
}

/// Primitive contract of the shared state store.
///
/// Implementations must make `compare_and_swap`, `delete`, `incr`,
/// `list_push` and `list_pop` atomic with respect to concurrent callers;
/// the failover and admission protocols rely on these primitives instead
/// of any cross-node locking.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Read a value. Returns `None` for absent or expired keys.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value, replacing any previous one. `ttl = None` means no expiry.
    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Atomic compare-and-swap.
    ///
    /// Writes `value` only if the current value equals `expected`
    /// (`expected = None` means "insert only if absent"). Returns whether
    /// the swap was applied.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool>;

    /// Delete a key, reporting whether it existed (delete-returns-previous).
    async fn delete(&self, key: &str) -> Result<bool>;

    /// List all live key/value pairs whose key starts with `prefix`.
    async fn scan(&self, prefix: &str) -> Result<Vec<(String, String)>>;

    /// Atomically add `delta` to the integer at `key` (treating absence as 0)
    /// and return the new value.
    async fn incr(&self, key: &str, delta: i64) -> Result<i64>;

    /// Append a value to the back of the list at `key`.
    async fn list_push(&self, key: &str, value: &str) -> Result<()>;

    /// Pop a value from the front of the list at `key` (FIFO).
    async fn list_pop(&self, key: &str) -> Result<Option<String>>;

    /// Length of the list at `key`.
    async fn list_len(&self, key: &str) -> Result<usize>;

    /// Cheap liveness probe used by the health monitor.
    async fn ping(&self) -> Result<()>;

    /// Drop and re-establish underlying connections. Default no-op for
    /// implementations without connection state.
    async fn reset(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Clone, Debug)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Default)]
struct MemoryInner {
    entries: HashMap<String, Entry>,
    lists: HashMap<String, VecDeque<String>>,
}

/// In-process [`StateStore`] with lazy TTL expiry.
///
/// All operations take a single mutex, which makes the atomic primitives
/// trivially correct; this is the default store for single-node use and
/// the test double for cluster scenarios (multiple orchestrators sharing
/// one `Arc<MemoryStore>` behave like nodes sharing one network store).
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        // A poisoned mutex means a panic mid-operation; propagating the
        // inner state is still safe for a plain map.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let mut inner = self.lock();
        match inner.entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                inner.entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let entry = Entry {
            value: value.to_string(),
            expires_at: ttl.map(|t| Instant::now() + t),
        };
        self.lock().entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool> {
        let now = Instant::now();
        let mut inner = self.lock();

        let current = match inner.entries.get(key) {
            Some(entry) if entry.is_expired(now) => None,
            Some(entry) => Some(entry.value.as_str()),
            None => None,
        };

        if current != expected {
            return Ok(false);
        }

        inner.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl.map(|t| now + t),
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        let mut inner = self.lock();
        match inner.entries.remove(key) {
            Some(entry) => Ok(!entry.is_expired(now)),
            None => Ok(false),
        }
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let now = Instant::now();
        let mut inner = self.lock();

        inner
            .entries
            .retain(|_, entry| !entry.is_expired(now));

        let mut matches: Vec<(String, String)> = inner
            .entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect();
        matches.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(matches)
    }

    async fn incr(&self, key: &str, delta: i64) -> Result<i64> {
        let now = Instant::now();
        let mut inner = self.lock();

        let current = match inner.entries.get(key) {
            Some(entry) if entry.is_expired(now) => 0,
            Some(entry) => entry
                .value
                .parse::<i64>()
                .map_err(|e| Error::Store(format!("counter at '{key}' is not an integer: {e}")))?,
            None => 0,
        };

        let updated = current + delta;
        inner.entries.insert(
            key.to_string(),
            Entry {
                value: updated.to_string(),
                expires_at: None,
            },
        );
        Ok(updated)
    }

    async fn list_push(&self, key: &str, value: &str) -> Result<()> {
        self.lock()
            .lists
            .entry(key.to_string())
            .or_default()
            .push_back(value.to_string());
        Ok(())
    }

    async fn list_pop(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .lock()
            .lists
            .get_mut(key)
            .and_then(|list| list.pop_front()))
    }

    async fn list_len(&self, key: &str) -> Result<usize> {
        Ok(self.lock().lists.get(key).map_or(0, |list| list.len()))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
