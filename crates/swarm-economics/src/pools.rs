use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::info;

use swarm_core::constants::MIN_VERIFIER_STAKE;
use swarm_core::types::{Balance, TimestampNs};
use swarm_core::now_ns;

/// Identity attributes used by committee diversity and related-party
/// checks.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct VerifierMetadata {
    pub org_id: Option<String>,
    pub asn: Option<u32>,
    pub region: Option<String>,
    pub tee_verified: bool,
}

/// A registered verifier. Active iff stake ≥ MIN_VERIFIER_STAKE.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct VerifierRecord {
    pub verifier_id: String,
    pub stake: Balance,
    pub reputation: f64,
    pub metadata: VerifierMetadata,
    pub registered_at_ns: TimestampNs,
}

/// In-memory registry of verifiers. Stake figures mirror the ledger's
/// locked balances; the coordinator keeps them in sync on stake and slash.
pub struct VerifierPool {
    verifiers: Mutex<HashMap<String, VerifierRecord>>,
}

impl VerifierPool {
    pub fn new() -> Self {
        Self {
            verifiers: Mutex::new(HashMap::new()),
        }
    }

    /// Register or refresh a verifier. New verifiers start at reputation
    /// 0.8.
    pub fn register(&self, verifier_id: &str, stake: Balance, metadata: VerifierMetadata) {
        let mut verifiers = self.verifiers.lock().expect("pool lock poisoned");
        let record = verifiers
            .entry(verifier_id.to_string())
            .or_insert_with(|| VerifierRecord {
                verifier_id: verifier_id.to_string(),
                stake: 0,
                reputation: 0.8,
                metadata: metadata.clone(),
                registered_at_ns: now_ns(),
            });
        record.stake = stake;
        record.metadata = metadata;
        info!(verifier_id, stake, "verifier registered");
    }

    pub fn set_stake(&self, verifier_id: &str, stake: Balance) {
        let mut verifiers = self.verifiers.lock().expect("pool lock poisoned");
        if let Some(record) = verifiers.get_mut(verifier_id) {
            record.stake = stake;
        }
    }

    pub fn set_reputation(&self, verifier_id: &str, reputation: f64) {
        let mut verifiers = self.verifiers.lock().expect("pool lock poisoned");
        if let Some(record) = verifiers.get_mut(verifier_id) {
            record.reputation = reputation.clamp(0.0, 1.0);
        }
    }

    pub fn get(&self, verifier_id: &str) -> Option<VerifierRecord> {
        self.verifiers
            .lock()
            .expect("pool lock poisoned")
            .get(verifier_id)
            .cloned()
    }

    /// Every verifier with stake ≥ `min_stake`, sorted by id for
    /// deterministic iteration.
    pub fn get_active_verifiers(&self, min_stake: Balance) -> Vec<VerifierRecord> {
        let verifiers = self.verifiers.lock().expect("pool lock poisoned");
        let mut active: Vec<VerifierRecord> = verifiers
            .values()
            .filter(|v| v.stake >= min_stake)
            .cloned()
            .collect();
        active.sort_by(|a, b| a.verifier_id.cmp(&b.verifier_id));
        active
    }

    /// Count of verifiers meeting the protocol's activity threshold.
    pub fn active_count(&self) -> u32 {
        self.get_active_verifiers(MIN_VERIFIER_STAKE).len() as u32
    }
}

impl Default for VerifierPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_requires_min_stake() {
        let pool = VerifierPool::new();
        pool.register("rich", 5_000, VerifierMetadata::default());
        pool.register("poor", 999, VerifierMetadata::default());
        assert_eq!(pool.active_count(), 1);
        assert_eq!(pool.get_active_verifiers(MIN_VERIFIER_STAKE)[0].verifier_id, "rich");
    }

    #[test]
    fn new_verifiers_start_at_default_reputation() {
        let pool = VerifierPool::new();
        pool.register("v", 2_000, VerifierMetadata::default());
        assert!((pool.get("v").unwrap().reputation - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn reputation_is_clamped() {
        let pool = VerifierPool::new();
        pool.register("v", 2_000, VerifierMetadata::default());
        pool.set_reputation("v", 1.7);
        assert_eq!(pool.get("v").unwrap().reputation, 1.0);
        pool.set_reputation("v", -0.4);
        assert_eq!(pool.get("v").unwrap().reputation, 0.0);
    }

    #[test]
    fn stake_update_changes_activity() {
        let pool = VerifierPool::new();
        pool.register("v", 2_000, VerifierMetadata::default());
        pool.set_stake("v", 100);
        assert_eq!(pool.active_count(), 0);
    }
}
