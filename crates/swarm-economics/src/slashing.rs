use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use swarm_core::constants::{
    SLASH_CHALLENGER_PERCENT, SLASH_HONEST_PERCENT, VERIFIER_SLASH_PERCENT,
};
use swarm_core::types::Balance;
use swarm_core::SwarmError;

use crate::ledger::CreditLedger;

/// Outcome of slashing a set of dishonest verifiers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SlashResult {
    pub total_slashed: Balance,
    pub challenger_payout: Balance,
    pub honest_payout: Balance,
    pub burned: Balance,
    pub slashed_verifiers: Vec<(String, Balance)>,
}

/// Slashing policy: dishonest verifiers lose half their stake; the pool is
/// split 50% to the challenger, 40% across honest verifiers, 10% burned.
/// All splits use integer arithmetic and the burn share absorbs rounding,
/// so the three always sum to the total.
pub struct SlashingRules {
    ledger: Arc<CreditLedger>,
}

impl SlashingRules {
    pub fn new(ledger: Arc<CreditLedger>) -> Self {
        Self { ledger }
    }

    /// Slash each dishonest verifier and distribute the pool.
    pub fn slash_verifiers(
        &self,
        dishonest: &[String],
        honest: &[String],
        challenger: &str,
        evidence_hash: &str,
    ) -> Result<SlashResult, SwarmError> {
        let mut total: Balance = 0;
        let mut slashed_verifiers = Vec::new();

        for verifier in dishonest {
            let stake = self
                .ledger
                .get_account(verifier)?
                .map(|a| a.locked)
                .unwrap_or(0);
            let amount = stake * VERIFIER_SLASH_PERCENT / 100;
            if amount == 0 {
                warn!(verifier = %verifier, "verifier has no stake to slash");
                continue;
            }
            self.ledger.slash_stake(verifier, amount)?;
            total += amount;
            slashed_verifiers.push((verifier.clone(), amount));
        }

        let challenger_payout = total * SLASH_CHALLENGER_PERCENT / 100;
        let honest_payout = total * SLASH_HONEST_PERCENT / 100;
        let burned = total - challenger_payout - honest_payout;

        if challenger_payout > 0 {
            self.ledger.credit_slashed(
                challenger,
                challenger_payout,
                json!({"role": "challenger", "evidence_hash": evidence_hash}),
            )?;
        }

        if honest_payout > 0 && !honest.is_empty() {
            // Equal split across honest verifiers; the first listed absorbs
            // the remainder so nothing is lost to rounding.
            let per_verifier = honest_payout / honest.len() as Balance;
            let remainder = honest_payout % honest.len() as Balance;
            for (i, verifier) in honest.iter().enumerate() {
                let share = per_verifier + if i == 0 { remainder } else { 0 };
                if share > 0 {
                    self.ledger.credit_slashed(
                        verifier,
                        share,
                        json!({"role": "honest_verifier", "evidence_hash": evidence_hash}),
                    )?;
                }
            }
        }

        info!(
            total,
            challenger_payout, honest_payout, burned, "slashing distributed"
        );
        Ok(SlashResult {
            total_slashed: total,
            challenger_payout,
            honest_payout,
            burned,
            slashed_verifiers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stake::StakeManager;

    fn setup(name: &str) -> (Arc<CreditLedger>, SlashingRules) {
        let dir = std::env::temp_dir().join(format!("swarm_slash_test_{name}"));
        let _ = std::fs::remove_dir_all(&dir);
        let ledger = Arc::new(CreditLedger::open(&dir).unwrap());
        (Arc::clone(&ledger), SlashingRules::new(ledger))
    }

    #[test]
    fn fifty_forty_ten_split() {
        let (ledger, rules) = setup("split");
        ledger.create_account("v1", 10_000, "system").unwrap();
        ledger.create_account("challenger", 0, "x").unwrap();
        ledger.create_account("honest1", 0, "x").unwrap();
        StakeManager::new(Arc::clone(&ledger)).stake("v1", 10_000).unwrap();

        let result = rules
            .slash_verifiers(
                &["v1".into()],
                &["honest1".into()],
                "challenger",
                &"e".repeat(64),
            )
            .unwrap();

        assert_eq!(result.total_slashed, 5_000); // 50% of stake
        assert_eq!(result.challenger_payout, 2_500);
        assert_eq!(result.honest_payout, 2_000);
        assert_eq!(result.burned, 500);
        assert_eq!(ledger.get_balance("challenger"), 2_500);
        assert_eq!(ledger.get_balance("honest1"), 2_000);
        assert_eq!(ledger.get_account("v1").unwrap().unwrap().locked, 5_000);
    }

    #[test]
    fn integer_arithmetic_never_loses_credits() {
        let (ledger, rules) = setup("precision");
        ledger.create_account("v1", 666, "system").unwrap();
        ledger.create_account("c", 0, "x").unwrap();
        StakeManager::new(Arc::clone(&ledger)).stake("v1", 666).unwrap();

        // 50% of 666 = 333; 333*50/100 = 166, 333*40/100 = 133, burn = 34.
        let result = rules
            .slash_verifiers(&["v1".into()], &["h1".into(), "h2".into()], "c", "00")
            .unwrap();
        assert_eq!(result.total_slashed, 333);
        assert_eq!(
            result.challenger_payout + result.honest_payout + result.burned,
            result.total_slashed
        );
        // Honest split: 133 / 2 = 66 each, remainder 1 to the first.
        assert_eq!(ledger.get_balance("h1"), 67);
        assert_eq!(ledger.get_balance("h2"), 66);
    }

    #[test]
    fn unstaked_verifier_is_skipped() {
        let (ledger, rules) = setup("no_stake");
        ledger.create_account("v1", 100, "system").unwrap();
        ledger.create_account("c", 0, "x").unwrap();
        let result = rules
            .slash_verifiers(&["v1".into()], &[], "c", "00")
            .unwrap();
        assert_eq!(result.total_slashed, 0);
        assert_eq!(ledger.get_balance("v1"), 100);
    }
}
