use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use swarm_core::constants::UNBONDING_DAYS;
use swarm_core::types::{Balance, TimestampNs};
use swarm_core::{now_ns, SwarmError};

use crate::ledger::CreditLedger;

/// Credits making their way from locked back to spendable.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct UnbondingRecord {
    pub unbonding_id: String,
    pub account_id: String,
    pub amount: Balance,
    pub started_at_ns: TimestampNs,
    pub completed_at_ns: TimestampNs,
    pub completed: bool,
}

/// Verifier staking with a time-locked unbonding queue.
///
/// Shares the ledger's database so stake moves and their audit rows land
/// together.
pub struct StakeManager {
    ledger: Arc<CreditLedger>,
    unbonding_secs: u64,
}

fn storage(e: sled::Error) -> SwarmError {
    SwarmError::Storage(e.to_string())
}

impl StakeManager {
    pub fn new(ledger: Arc<CreditLedger>) -> Self {
        Self {
            ledger,
            unbonding_secs: UNBONDING_DAYS * 24 * 3600,
        }
    }

    pub fn with_unbonding_secs(mut self, secs: u64) -> Self {
        self.unbonding_secs = secs;
        self
    }

    /// Stake credits: balance → locked.
    pub fn stake(&self, account_id: &str, amount: Balance) -> Result<(), SwarmError> {
        if amount == 0 {
            return Err(SwarmError::ZeroAmount);
        }
        self.ledger.stake_move(account_id, amount)?;
        info!(account_id, amount, "staked");
        Ok(())
    }

    /// Begin unstaking: locked → unbonding, releasable after the unbonding
    /// period. Returns the unbonding id.
    pub fn unstake(&self, account_id: &str, amount: Balance) -> Result<String, SwarmError> {
        if amount == 0 {
            return Err(SwarmError::ZeroAmount);
        }
        let started_at_ns = now_ns();
        let completed_at_ns = started_at_ns + (self.unbonding_secs as i64) * 1_000_000_000;
        let record = UnbondingRecord {
            unbonding_id: Uuid::new_v4().to_string(),
            account_id: account_id.to_string(),
            amount,
            started_at_ns,
            completed_at_ns,
            completed: false,
        };

        self.ledger
            .unstake_move(account_id, amount, &record.unbonding_id, completed_at_ns)?;
        let bytes =
            bincode::serialize(&record).map_err(|e| SwarmError::Serialization(e.to_string()))?;
        self.ledger
            .unbonding_tree
            .insert(record.unbonding_id.as_bytes(), bytes)
            .map_err(storage)?;
        info!(account_id, amount, unbonding_id = %record.unbonding_id, "unstake started");
        Ok(record.unbonding_id)
    }

    /// Scavenge every matured unbonding record for `account_id`: each is
    /// moved unbonding → balance exactly once and stamped completed.
    pub fn complete_unbonding(&self, account_id: &str) -> Result<Balance, SwarmError> {
        let now = now_ns();
        let mut released = 0;
        for mut record in self.unbonding_records(account_id, false)? {
            if record.completed_at_ns > now {
                continue;
            }
            self.ledger
                .complete_unbonding_move(account_id, record.amount, &record.unbonding_id)?;
            record.completed = true;
            let bytes = bincode::serialize(&record)
                .map_err(|e| SwarmError::Serialization(e.to_string()))?;
            self.ledger
                .unbonding_tree
                .insert(record.unbonding_id.as_bytes(), bytes)
                .map_err(storage)?;
            released += record.amount;
        }
        if released > 0 {
            info!(account_id, released, "unbonding completed");
        }
        Ok(released)
    }

    pub fn staked_amount(&self, account_id: &str) -> Balance {
        self.ledger
            .get_account(account_id)
            .ok()
            .flatten()
            .map(|a| a.locked)
            .unwrap_or(0)
    }

    pub fn unbonding_amount(&self, account_id: &str) -> Balance {
        self.ledger
            .get_account(account_id)
            .ok()
            .flatten()
            .map(|a| a.unbonding)
            .unwrap_or(0)
    }

    pub fn unbonding_records(
        &self,
        account_id: &str,
        include_completed: bool,
    ) -> Result<Vec<UnbondingRecord>, SwarmError> {
        let mut out = Vec::new();
        for item in self.ledger.unbonding_tree.iter() {
            let (_, bytes) = item.map_err(storage)?;
            let record: UnbondingRecord =
                bincode::deserialize(&bytes).map_err(|e| SwarmError::Serialization(e.to_string()))?;
            if record.account_id == account_id && (include_completed || !record.completed) {
                out.push(record);
            }
        }
        out.sort_by_key(|r| std::cmp::Reverse(r.started_at_ns));
        Ok(out)
    }
}
