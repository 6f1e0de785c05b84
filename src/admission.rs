//! Admission control
//!
//! A pure concurrency gate applied before a job enters the queue. Each tier
//! has a distinct ceiling on concurrent non-terminal jobs; a submission over
//! the ceiling is rejected without side effects and the caller must retry
//! later. Rejected submissions are never buffered — backpressure is pushed
//! to the edge.
//!
//! The in-flight count is an atomic counter in the shared state store, so
//! the ceiling holds cluster-wide under concurrent submission bursts
//! without any cross-node locking.

use std::sync::Arc;

use crate::config::AdmissionConfig;
use crate::error::{Error, Result};
use crate::store::{StateStore, keys};
use crate::types::Tier;

/// Gate that admits jobs against tier-specific concurrency ceilings
#[derive(Clone)]
pub struct AdmissionController {
    store: Arc<dyn StateStore>,
    config: AdmissionConfig,
}

impl AdmissionController {
    /// Create a controller over the given store and ceilings
    pub fn new(store: Arc<dyn StateStore>, config: AdmissionConfig) -> Self {
        Self { store, config }
    }

    /// The configured ceiling for a tier
    pub fn ceiling(&self, tier: Tier) -> usize {
        match tier {
            Tier::Standard => self.config.standard_limit,
            Tier::Elevated => self.config.elevated_limit,
        }
    }

    /// Try to admit one job under `tier`.
    ///
    /// Atomically increments the tier's in-flight counter; if the result
    /// exceeds the ceiling the increment is rolled back and
    /// [`Error::AdmissionRejected`] is returned with the ceiling for client
    /// backoff guidance. Admitted jobs must be released exactly once when
    /// they reach a terminal state.
    pub async fn try_admit(&self, tier: Tier) -> Result<()> {
        let limit = self.ceiling(tier);
        let key = keys::admission(tier);

        let count = self.store.incr(&key, 1).await?;
        if count > limit as i64 {
            self.store.incr(&key, -1).await?;
            return Err(Error::AdmissionRejected { tier, limit });
        }

        Ok(())
    }

    /// Release one admitted slot when a job reaches a terminal state.
    pub async fn release(&self, tier: Tier) -> Result<()> {
        let key = keys::admission(tier);
        let count = self.store.incr(&key, -1).await?;
        if count < 0 {
            // A negative counter means a double release; clamp back so the
            // gate does not over-admit afterwards.
            tracing::warn!(tier = tier.as_str(), count, "admission counter underflow");
            self.store.incr(&key, 1).await?;
        }
        Ok(())
    }

    /// Re-occupy a slot for a FAILED job re-entering the pool through the
    /// retry contract. Bypasses the ceiling check: the job was already
    /// admitted once and its failure released the slot.
    pub async fn readmit(&self, tier: Tier) -> Result<()> {
        self.store.incr(&keys::admission(tier), 1).await?;
        Ok(())
    }

    /// Current in-flight count for a tier
    pub async fn in_flight(&self, tier: Tier) -> Result<i64> {
        let value = self.store.get(&keys::admission(tier)).await?;
        match value {
            Some(raw) => raw
                .parse::<i64>()
                .map_err(|e| Error::Store(format!("admission counter corrupt: {e}"))),
            None => Ok(0),
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AdmissionConfig;
    use crate::store::MemoryStore;

    fn controller(standard: usize, elevated: usize) -> AdmissionController {
        AdmissionController::new(
            Arc::new(MemoryStore::new()),
            AdmissionConfig {
                standard_limit: standard,
                elevated_limit: elevated,
            },
        )
    }

    #[tokio::test]
    async fn admits_up_to_ceiling_then_rejects() {
        let gate = controller(3, 10);

        for _ in 0..3 {
            gate.try_admit(Tier::Standard).await.unwrap();
        }

        let err = gate.try_admit(Tier::Standard).await.unwrap_err();
        match err {
            Error::AdmissionRejected { tier, limit } => {
                assert_eq!(tier, Tier::Standard);
                assert_eq!(limit, 3, "rejection must carry the ceiling");
            }
            other => panic!("expected AdmissionRejected, got {other:?}"),
        }

        assert_eq!(gate.in_flight(Tier::Standard).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn rejection_has_no_lasting_side_effects() {
        let gate = controller(1, 10);
        gate.try_admit(Tier::Standard).await.unwrap();

        for _ in 0..5 {
            assert!(gate.try_admit(Tier::Standard).await.is_err());
        }
        assert_eq!(
            gate.in_flight(Tier::Standard).await.unwrap(),
            1,
            "rejected submissions must not consume slots"
        );
    }

    #[tokio::test]
    async fn tiers_have_independent_ceilings() {
        let gate = controller(1, 2);
        gate.try_admit(Tier::Standard).await.unwrap();
        assert!(gate.try_admit(Tier::Standard).await.is_err());

        gate.try_admit(Tier::Elevated).await.unwrap();
        gate.try_admit(Tier::Elevated).await.unwrap();
        assert!(gate.try_admit(Tier::Elevated).await.is_err());
    }

    #[tokio::test]
    async fn release_frees_a_slot() {
        let gate = controller(1, 10);
        gate.try_admit(Tier::Standard).await.unwrap();
        assert!(gate.try_admit(Tier::Standard).await.is_err());

        gate.release(Tier::Standard).await.unwrap();
        gate.try_admit(Tier::Standard).await.unwrap();
    }

    #[tokio::test]
    async fn double_release_does_not_over_admit() {
        let gate = controller(2, 10);
        gate.try_admit(Tier::Standard).await.unwrap();
        gate.release(Tier::Standard).await.unwrap();
        gate.release(Tier::Standard).await.unwrap();

        gate.try_admit(Tier::Standard).await.unwrap();
        gate.try_admit(Tier::Standard).await.unwrap();
        assert!(
            gate.try_admit(Tier::Standard).await.is_err(),
            "underflow clamp must keep the ceiling intact"
        );
    }

    #[tokio::test]
    async fn concurrent_burst_never_exceeds_ceiling() {
        let gate = Arc::new(controller(3, 10));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let gate = gate.clone();
            handles.push(tokio::spawn(async move {
                gate.try_admit(Tier::Standard).await.is_ok()
            }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 3, "exactly ceiling-many submissions admitted");
        assert_eq!(gate.in_flight(Tier::Standard).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn readmit_bypasses_ceiling() {
        let gate = controller(1, 10);
        gate.try_admit(Tier::Standard).await.unwrap();

        // A retried job re-occupies its slot without being gated again
        gate.readmit(Tier::Standard).await.unwrap();
        assert_eq!(gate.in_flight(Tier::Standard).await.unwrap(), 2);
    }
}
