use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use swarm_core::types::TimestampNs;
use swarm_core::now_ns;

use crate::pools::VerifierPool;

const FAILED_ATTESTATION_PENALTY: f64 = -0.3;
const UPHELD_CHALLENGE_BOOST: f64 = 0.1;
const DECAY_RATE_PER_WEEK: f64 = 0.05;
const WEEK_NS: i64 = 7 * 24 * 3600 * 1_000_000_000;

/// Verifier reputation: starts at 0.8, penalized for attestations a
/// challenge overturned, boosted for upheld challenges the verifier
/// raised, and decayed 5% per idle week. Always clamped to [0, 1].
pub struct ReputationTracker {
    pool: Arc<VerifierPool>,
    last_activity: Mutex<HashMap<String, TimestampNs>>,
}

impl ReputationTracker {
    pub fn new(pool: Arc<VerifierPool>) -> Self {
        Self {
            pool,
            last_activity: Mutex::new(HashMap::new()),
        }
    }

    /// Reputation with idle decay applied at read time.
    pub fn get_reputation(&self, verifier_id: &str) -> f64 {
        let base = self
            .pool
            .get(verifier_id)
            .map(|v| v.reputation)
            .unwrap_or(0.8);
        let last = self
            .last_activity
            .lock()
            .expect("reputation lock poisoned")
            .get(verifier_id)
            .copied();
        match last {
            Some(ts) => {
                let idle_weeks = ((now_ns() - ts).max(0) as f64) / WEEK_NS as f64;
                (base * (1.0 - DECAY_RATE_PER_WEEK * idle_weeks).max(0.0)).clamp(0.0, 1.0)
            }
            None => base,
        }
    }

    /// Penalize a verifier whose attestation a challenge overturned.
    pub fn record_failed_attestation(&self, verifier_id: &str) {
        self.adjust(verifier_id, FAILED_ATTESTATION_PENALTY);
    }

    /// Boost a verifier whose own challenge was upheld.
    pub fn record_upheld_challenge(&self, verifier_id: &str) {
        self.adjust(verifier_id, UPHELD_CHALLENGE_BOOST);
    }

    /// Note activity without changing the score (resets decay).
    pub fn touch(&self, verifier_id: &str) {
        self.last_activity
            .lock()
            .expect("reputation lock poisoned")
            .insert(verifier_id.to_string(), now_ns());
    }

    fn adjust(&self, verifier_id: &str, delta: f64) {
        let current = self.get_reputation(verifier_id);
        let updated = (current + delta).clamp(0.0, 1.0);
        self.pool.set_reputation(verifier_id, updated);
        self.touch(verifier_id);
        debug!(verifier_id, delta, updated, "reputation adjusted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pools::VerifierMetadata;

    fn setup() -> (Arc<VerifierPool>, ReputationTracker) {
        let pool = Arc::new(VerifierPool::new());
        pool.register("v1", 5_000, VerifierMetadata::default());
        let tracker = ReputationTracker::new(Arc::clone(&pool));
        (pool, tracker)
    }

    #[test]
    fn failed_attestation_penalizes() {
        let (_, tracker) = setup();
        tracker.record_failed_attestation("v1");
        assert!((tracker.get_reputation("v1") - 0.5).abs() < 1e-9);
    }

    #[test]
    fn upheld_challenge_boosts_with_clamp() {
        let (pool, tracker) = setup();
        pool.set_reputation("v1", 0.95);
        tracker.record_upheld_challenge("v1");
        assert_eq!(tracker.get_reputation("v1"), 1.0);
    }

    #[test]
    fn repeated_penalties_floor_at_zero() {
        let (_, tracker) = setup();
        for _ in 0..5 {
            tracker.record_failed_attestation("v1");
        }
        assert_eq!(tracker.get_reputation("v1"), 0.0);
    }

    #[test]
    fn unknown_verifier_reads_default() {
        let (_, tracker) = setup();
        assert!((tracker.get_reputation("ghost") - 0.8).abs() < 1e-9);
    }
}
