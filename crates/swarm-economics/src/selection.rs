use std::collections::HashMap;
use std::sync::Arc;

use rand::distributions::{Distribution, WeightedIndex};
use tracing::warn;

use swarm_core::types::Balance;
use swarm_core::{now_ns, SwarmError};

use crate::pools::{VerifierPool, VerifierRecord};
use crate::reputation::ReputationTracker;

const MAX_SAMPLING_ATTEMPTS: usize = 1_000;
const DAY_NS: f64 = 24.0 * 3600.0 * 1e9;

/// Caps on committee concentration.
#[derive(Clone, Copy, Debug)]
pub struct DiversityConstraints {
    pub max_org_fraction: f64,
    pub max_asn_fraction: f64,
    pub max_region_fraction: f64,
}

impl Default for DiversityConstraints {
    fn default() -> Self {
        Self {
            max_org_fraction: 0.30,
            max_asn_fraction: 0.40,
            max_region_fraction: 0.50,
        }
    }
}

/// Weighted, diversity-constrained committee selection.
///
/// Weight = √stake × reputation × recency_factor × tee_multiplier. The √
/// dampens whale advantage; TEE-verified verifiers count double.
pub struct VerifierSelector {
    pool: Arc<VerifierPool>,
    reputation: Arc<ReputationTracker>,
}

impl VerifierSelector {
    pub fn new(pool: Arc<VerifierPool>, reputation: Arc<ReputationTracker>) -> Self {
        Self { pool, reputation }
    }

    pub fn calculate_weight(&self, verifier: &VerifierRecord) -> f64 {
        let stake_weight = (verifier.stake as f64).sqrt();
        let reputation = self.reputation.get_reputation(&verifier.verifier_id);
        let age_days = ((now_ns() - verifier.registered_at_ns).max(0) as f64) / DAY_NS;
        let recency_factor = 1.0 - ((age_days / 365.0) * 0.2).min(0.2);
        let tee_multiplier = if verifier.metadata.tee_verified { 2.0 } else { 1.0 };
        stake_weight * reputation * recency_factor * tee_multiplier
    }

    /// Pick a committee of `k` active verifiers. Weighted sampling with
    /// rejection on diversity violations; after a bounded number of
    /// attempts, falls back to a greedy pass and finally to top-by-weight.
    pub fn select_committee(
        &self,
        k: usize,
        min_stake: Balance,
        constraints: &DiversityConstraints,
    ) -> Result<Vec<VerifierRecord>, SwarmError> {
        let candidates = self.pool.get_active_verifiers(min_stake);
        if candidates.len() < k {
            return Err(SwarmError::Other(format!(
                "insufficient qualified verifiers: need {k}, have {}",
                candidates.len()
            )));
        }

        let weights: Vec<f64> = candidates
            .iter()
            .map(|v| self.calculate_weight(v).max(f64::MIN_POSITIVE))
            .collect();
        let dist = WeightedIndex::new(&weights)
            .map_err(|e| SwarmError::Other(format!("bad selection weights: {e}")))?;
        let mut rng = rand::thread_rng();

        for _ in 0..MAX_SAMPLING_ATTEMPTS {
            let mut committee: Vec<VerifierRecord> = Vec::with_capacity(k);
            let mut picked = std::collections::HashSet::new();
            while committee.len() < k && picked.len() < candidates.len() {
                let idx = dist.sample(&mut rng);
                if picked.insert(idx) {
                    committee.push(candidates[idx].clone());
                }
            }
            if committee.len() == k && enforce_diversity(&committee, constraints) {
                return Ok(committee);
            }
        }

        warn!(k, "rejection sampling failed to find a diverse committee; using greedy fallback");

        // Greedy: strongest first, adding only members that keep the
        // committee diverse.
        let mut by_weight: Vec<(usize, f64)> = weights.iter().copied().enumerate().collect();
        by_weight.sort_by(|a, b| b.1.total_cmp(&a.1));

        let mut committee = Vec::with_capacity(k);
        for (idx, _) in &by_weight {
            if committee.len() == k {
                break;
            }
            let mut trial = committee.clone();
            trial.push(candidates[*idx].clone());
            if enforce_diversity(&trial, constraints) {
                committee = trial;
            }
        }
        if committee.len() < k {
            // Constraints are unsatisfiable with this pool; relax to the
            // top-weighted k rather than stall the protocol.
            committee = by_weight
                .iter()
                .take(k)
                .map(|(idx, _)| candidates[*idx].clone())
                .collect();
        }
        Ok(committee)
    }
}

/// True iff no org/ASN/region exceeds its concentration cap.
pub fn enforce_diversity(committee: &[VerifierRecord], constraints: &DiversityConstraints) -> bool {
    if committee.is_empty() {
        return true;
    }
    within_cap(committee, constraints.max_org_fraction, |v| {
        v.metadata.org_id.clone()
    }) && within_cap(committee, constraints.max_asn_fraction, |v| {
        v.metadata.asn.map(|a| a.to_string())
    }) && within_cap(committee, constraints.max_region_fraction, |v| {
        v.metadata.region.clone()
    })
}

fn within_cap<F>(committee: &[VerifierRecord], max_fraction: f64, attr: F) -> bool
where
    F: Fn(&VerifierRecord) -> Option<String>,
{
    let max_allowed = ((committee.len() as f64) * max_fraction).ceil() as usize;
    let mut counts: HashMap<String, usize> = HashMap::new();
    for member in committee {
        if let Some(value) = attr(member) {
            *counts.entry(value).or_default() += 1;
        }
    }
    counts.values().all(|count| *count <= max_allowed)
}
