use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use tracing::debug;

use swarm_core::constants::{BOOTSTRAP_VERIFIER_THRESHOLD, K_PLAN_ALPHA, K_PLAN_TARGET};
use swarm_core::types::{AgentId, NeedId, ProposalId};

/// K_plan for a verifier pool of the given size:
/// `min(k_target, max(1, floor(active · alpha)))`.
pub fn k_plan(active_verifiers: u32, alpha: f64, k_target: u32) -> u32 {
    let calculated = ((active_verifiers as f64) * alpha).floor() as u32;
    calculated.max(1).min(k_target)
}

/// K_plan with bootstrap support: a cold network (< 10 active verifiers)
/// runs at K = 1 so the first threads are not blocked on quorum.
pub fn k_plan_with_bootstrap(active_verifiers: u32) -> u32 {
    if active_verifiers < BOOTSTRAP_VERIFIER_THRESHOLD {
        return 1;
    }
    k_plan(active_verifiers, K_PLAN_ALPHA, K_PLAN_TARGET)
}

/// Escalate K_result after upheld challenges: one upheld challenge adds 2;
/// repeated challenges double, capped at the active verifier count.
pub fn escalate_k_result(
    current_k: u32,
    challenge_count: u32,
    active_verifiers: u32,
    upheld_challenges: u32,
) -> u32 {
    if upheld_challenges == 0 {
        return current_k;
    }
    if challenge_count <= 1 {
        current_k + 2
    } else {
        (2 * current_k).min(active_verifiers)
    }
}

struct QuorumState {
    attesters: HashSet<AgentId>,
    k_required: u32,
}

impl QuorumState {
    fn has_quorum(&self) -> bool {
        self.attesters.len() as u32 >= self.k_required
    }
}

/// Tracks attestation sets per (need, proposal) and reports quorum
/// completion exactly once.
pub struct QuorumTracker {
    states: Mutex<HashMap<(NeedId, ProposalId), QuorumState>>,
}

impl QuorumTracker {
    pub fn new() -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Record an attestation from `verifier_id`.
    ///
    /// Returns true iff this attestation is the one that completes quorum:
    /// duplicates from the same verifier never count twice, and once quorum
    /// is reached further attestations return false.
    pub fn record_attestation(
        &self,
        need_id: &str,
        proposal_id: &str,
        verifier_id: &str,
        k_required: u32,
    ) -> bool {
        let mut states = self.states.lock().expect("quorum lock poisoned");
        let state = states
            .entry((need_id.to_string(), proposal_id.to_string()))
            .or_insert_with(|| QuorumState {
                attesters: HashSet::new(),
                k_required,
            });

        let was_quorum = state.has_quorum();
        state.attesters.insert(verifier_id.to_string());
        let completed = state.has_quorum() && !was_quorum;
        debug!(
            need_id,
            proposal_id,
            attesters = state.attesters.len(),
            k = state.k_required,
            completed,
            "attestation recorded"
        );
        completed
    }

    pub fn has_quorum(&self, need_id: &str, proposal_id: &str) -> bool {
        let states = self.states.lock().expect("quorum lock poisoned");
        states
            .get(&(need_id.to_string(), proposal_id.to_string()))
            .map(QuorumState::has_quorum)
            .unwrap_or(false)
    }

    pub fn attestation_count(&self, need_id: &str, proposal_id: &str) -> usize {
        let states = self.states.lock().expect("quorum lock poisoned");
        states
            .get(&(need_id.to_string(), proposal_id.to_string()))
            .map(|s| s.attesters.len())
            .unwrap_or(0)
    }
}

impl Default for QuorumTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn k_plan_formula() {
        assert_eq!(k_plan(5, 0.3, 5), 1); // floor(1.5) = 1
        assert_eq!(k_plan(10, 0.3, 5), 3);
        assert_eq!(k_plan(20, 0.3, 5), 5); // capped at k_target
        assert_eq!(k_plan(0, 0.3, 5), 1); // floor at 1
    }

    #[test]
    fn bootstrap_forces_k_one() {
        assert_eq!(k_plan_with_bootstrap(3), 1);
        assert_eq!(k_plan_with_bootstrap(9), 1);
        assert_eq!(k_plan_with_bootstrap(10), 3);
    }

    #[test]
    fn escalation_rules() {
        // Single upheld challenge: K += 2.
        assert_eq!(escalate_k_result(3, 1, 100, 1), 5);
        // Repeated challenges: K doubles, capped by pool size.
        assert_eq!(escalate_k_result(3, 2, 100, 2), 6);
        assert_eq!(escalate_k_result(40, 3, 50, 2), 50);
        // Nothing upheld: unchanged.
        assert_eq!(escalate_k_result(3, 2, 100, 0), 3);
    }

    #[test]
    fn quorum_completes_exactly_once() {
        let tracker = QuorumTracker::new();
        assert!(!tracker.record_attestation("N1", "P1", "v1", 2));
        assert!(tracker.record_attestation("N1", "P1", "v2", 2));
        // Further attestations, and retries, do not re-trigger.
        assert!(!tracker.record_attestation("N1", "P1", "v3", 2));
        assert!(!tracker.record_attestation("N1", "P1", "v2", 2));
    }

    #[test]
    fn duplicate_attesters_do_not_count() {
        let tracker = QuorumTracker::new();
        assert!(!tracker.record_attestation("N1", "P1", "v1", 2));
        assert!(!tracker.record_attestation("N1", "P1", "v1", 2));
        assert_eq!(tracker.attestation_count("N1", "P1"), 1);
        assert!(!tracker.has_quorum("N1", "P1"));
    }

    #[test]
    fn proposals_are_tracked_independently() {
        let tracker = QuorumTracker::new();
        assert!(tracker.record_attestation("N1", "P1", "v1", 1));
        assert!(!tracker.has_quorum("N1", "P2"));
        assert!(tracker.record_attestation("N1", "P2", "v1", 1));
    }
}
