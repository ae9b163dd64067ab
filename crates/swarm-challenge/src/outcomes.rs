use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use swarm_core::constants::{SYSTEM_ACCOUNT, UPHELD_REWARD_MULTIPLIER, WITHDRAWAL_FEE_PERCENT};
use swarm_core::constants::BURN_ACCOUNT;
use swarm_core::types::Balance;
use swarm_core::SwarmError;
use swarm_economics::{CreditLedger, SlashResult, SlashingRules};

/// Terminal states of a challenge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChallengeOutcome {
    /// The challenge was valid — the attesting verifiers were wrong.
    Upheld,
    /// The challenge was frivolous — the result stands.
    Rejected,
    /// The challenger pulled out before verification.
    Withdrawn,
}

impl ChallengeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeOutcome::Upheld => "UPHELD",
            ChallengeOutcome::Rejected => "REJECTED",
            ChallengeOutcome::Withdrawn => "WITHDRAWN",
        }
    }
}

/// What the settlement did with the bond and the verifiers' stakes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutcomeResult {
    pub outcome: ChallengeOutcome,
    pub bond_returned: Balance,
    pub bond_slashed: Balance,
    pub reward_amount: Balance,
    pub slash: Option<SlashResult>,
}

/// Settles challenge outcomes against the ledger.
///
/// UPHELD: bond back + 2× reward to the challenger, dishonest verifiers
/// slashed 50% with the 50/40/10 distribution. REJECTED: bond burned.
/// WITHDRAWN: bond back minus the 10% fee.
pub struct OutcomeHandler {
    ledger: Arc<CreditLedger>,
    slashing: SlashingRules,
}

impl OutcomeHandler {
    pub fn new(ledger: Arc<CreditLedger>) -> Self {
        let slashing = SlashingRules::new(Arc::clone(&ledger));
        Self { ledger, slashing }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn process_outcome(
        &self,
        challenge_id: &str,
        outcome: ChallengeOutcome,
        bond_amount: Balance,
        escrow_id: &str,
        challenger_id: &str,
        dishonest_verifiers: &[String],
        honest_verifiers: &[String],
        evidence_hash: &str,
    ) -> Result<OutcomeResult, SwarmError> {
        let result = match outcome {
            ChallengeOutcome::Upheld => {
                let bond_returned = self.ledger.release_escrow(escrow_id, challenger_id)?;
                let reward_amount = bond_amount * UPHELD_REWARD_MULTIPLIER;
                self.ledger
                    .transfer(SYSTEM_ACCOUNT, challenger_id, reward_amount, true)?;
                let slash = self.slashing.slash_verifiers(
                    dishonest_verifiers,
                    honest_verifiers,
                    challenger_id,
                    evidence_hash,
                )?;
                OutcomeResult {
                    outcome,
                    bond_returned,
                    bond_slashed: 0,
                    reward_amount,
                    slash: Some(slash),
                }
            }
            ChallengeOutcome::Rejected => {
                let bond_slashed = self.ledger.burn_escrow(escrow_id)?;
                OutcomeResult {
                    outcome,
                    bond_returned: 0,
                    bond_slashed,
                    reward_amount: 0,
                    slash: None,
                }
            }
            ChallengeOutcome::Withdrawn => {
                let released = self.ledger.release_escrow(escrow_id, challenger_id)?;
                let fee = released * WITHDRAWAL_FEE_PERCENT / 100;
                if fee > 0 {
                    self.ledger.transfer(challenger_id, BURN_ACCOUNT, fee, true)?;
                }
                OutcomeResult {
                    outcome,
                    bond_returned: released - fee,
                    bond_slashed: fee,
                    reward_amount: 0,
                    slash: None,
                }
            }
        };

        info!(
            challenge_id,
            outcome = outcome.as_str(),
            bond_returned = result.bond_returned,
            bond_slashed = result.bond_slashed,
            reward = result.reward_amount,
            "challenge settled"
        );
        Ok(result)
    }
}
