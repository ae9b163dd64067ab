use std::path::Path;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

use swarm_core::constants::{MAX_SUPPLY, SYSTEM_ACCOUNT};
use swarm_core::types::Balance;
use swarm_core::{now_ns, SwarmError};

/// One account's credit position. The three buckets are disjoint:
/// spendable balance, staked (locked), and stake on its way out (unbonding).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Account {
    pub account_id: String,
    pub balance: Balance,
    pub locked: Balance,
    pub unbonding: Balance,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum EscrowState {
    Held,
    Released,
    Cancelled,
}

/// Credits held aside for a pending outcome (challenge bonds, bounties).
/// Transitions out of `Held` exactly once.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Escrow {
    pub escrow_id: String,
    pub account_id: String,
    pub amount: Balance,
    pub state: EscrowState,
}

/// Row in the operations audit trail.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LedgerOp {
    pub op_id: String,
    pub account: String,
    pub op_type: String,
    pub amount: Balance,
    pub timestamp_ns: i64,
    pub metadata: Value,
}

/// ACID credit ledger on sled.
///
/// Trees:
///   accounts        — account_id → bincode(Account)
///   escrows         — escrow_id  → bincode(Escrow)
///   operations      — ts_be ++ op_id → json(LedgerOp)   (audit trail)
///   unbonding       — unbonding_id → bincode(UnbondingRecord)
///   system_accounts — account_id → []                   (minter allow-list)
///   meta            — "total_supply" → u64 be
///
/// Every mutation runs under one mutex — the row-lock that serializes
/// concurrent escrow releases — and re-checks its pre-conditions inside the
/// critical section, so balance / locked / unbonding can never go negative
/// and Σ(balance + locked + unbonding) never exceeds MAX_SUPPLY.
pub struct CreditLedger {
    pub(crate) _db: sled::Db,
    accounts: sled::Tree,
    escrows: sled::Tree,
    operations: sled::Tree,
    pub(crate) unbonding_tree: sled::Tree,
    system_accounts: sled::Tree,
    meta: sled::Tree,
    pub(crate) lock: Mutex<()>,
}

fn storage(e: sled::Error) -> SwarmError {
    SwarmError::Storage(e.to_string())
}

const SUPPLY_KEY: &[u8] = b"total_supply";

impl CreditLedger {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SwarmError> {
        let db = sled::open(path).map_err(storage)?;
        let ledger = Self {
            accounts: db.open_tree("accounts").map_err(storage)?,
            escrows: db.open_tree("escrows").map_err(storage)?,
            operations: db.open_tree("operations").map_err(storage)?,
            unbonding_tree: db.open_tree("unbonding").map_err(storage)?,
            system_accounts: db.open_tree("system_accounts").map_err(storage)?,
            meta: db.open_tree("meta").map_err(storage)?,
            _db: db,
            lock: Mutex::new(()),
        };
        Ok(ledger)
    }

    // ── Accounts ─────────────────────────────────────────────────────────────

    /// Create an account. A non-zero `initial_balance` mints new credits and
    /// requires an authorized minter; zero-balance creation is open to all.
    pub fn create_account(
        &self,
        account_id: &str,
        initial_balance: Balance,
        minter_id: &str,
    ) -> Result<(), SwarmError> {
        let _guard = self.lock.lock().expect("ledger lock poisoned");
        if self.read_account(account_id)?.is_some() {
            return Err(SwarmError::AccountExists(account_id.to_string()));
        }
        if initial_balance > 0 {
            if !self.is_authorized_minter(minter_id) {
                return Err(SwarmError::UnauthorizedMinter(minter_id.to_string()));
            }
            let supply = self.total_supply();
            if supply.saturating_add(initial_balance) > MAX_SUPPLY {
                return Err(SwarmError::SupplyCapExceeded {
                    mint: initial_balance,
                });
            }
            self.set_supply(supply + initial_balance)?;
        }
        self.write_account(&Account {
            account_id: account_id.to_string(),
            balance: initial_balance,
            locked: 0,
            unbonding: 0,
        })?;
        if initial_balance > 0 {
            self.record_op(account_id, "MINT", initial_balance, json!({"minter": minter_id}))?;
        }
        info!(account_id, initial_balance, "account created");
        Ok(())
    }

    /// Add an account to the minter allow-list. Only `system` and accounts
    /// registered here may mint.
    pub fn register_system_account(&self, account_id: &str) -> Result<(), SwarmError> {
        self.system_accounts
            .insert(account_id.as_bytes(), &[][..])
            .map_err(storage)?;
        Ok(())
    }

    pub fn is_authorized_minter(&self, account_id: &str) -> bool {
        account_id == SYSTEM_ACCOUNT
            || self
                .system_accounts
                .contains_key(account_id.as_bytes())
                .unwrap_or(false)
    }

    pub fn get_account(&self, account_id: &str) -> Result<Option<Account>, SwarmError> {
        self.read_account(account_id)
    }

    /// Spendable balance; 0 for unknown accounts.
    pub fn get_balance(&self, account_id: &str) -> Balance {
        self.read_account(account_id)
            .ok()
            .flatten()
            .map(|a| a.balance)
            .unwrap_or(0)
    }

    /// Σ balance + locked + unbonding across all accounts, tracked as a
    /// counter and bounded by MAX_SUPPLY.
    pub fn total_supply(&self) -> Balance {
        self.meta
            .get(SUPPLY_KEY)
            .ok()
            .flatten()
            .map(|v| {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&v);
                Balance::from_be_bytes(buf)
            })
            .unwrap_or(0)
    }

    // ── Transfers ────────────────────────────────────────────────────────────

    /// Move credits between accounts in one serialized step. The recipient
    /// must exist unless `allow_create_recipient`.
    pub fn transfer(
        &self,
        from: &str,
        to: &str,
        amount: Balance,
        allow_create_recipient: bool,
    ) -> Result<(), SwarmError> {
        if amount == 0 {
            return Err(SwarmError::ZeroAmount);
        }
        let _guard = self.lock.lock().expect("ledger lock poisoned");

        let mut sender = self
            .read_account(from)?
            .ok_or_else(|| SwarmError::UnknownAccount(from.to_string()))?;
        if sender.balance < amount {
            return Err(SwarmError::InsufficientBalance {
                need: amount,
                have: sender.balance,
            });
        }

        let mut recipient = match self.read_account(to)? {
            Some(acc) => acc,
            None if allow_create_recipient => Account {
                account_id: to.to_string(),
                balance: 0,
                locked: 0,
                unbonding: 0,
            },
            None => return Err(SwarmError::RecipientMissing(to.to_string())),
        };

        sender.balance -= amount;
        recipient.balance += amount;
        self.write_account(&sender)?;
        self.write_account(&recipient)?;
        self.record_op(from, "TRANSFER", amount, json!({"to_account": to}))?;
        debug!(from, to, amount, "transfer");
        Ok(())
    }

    // ── Escrows ──────────────────────────────────────────────────────────────

    /// Move `amount` from balance to locked under `escrow_id`.
    ///
    /// Idempotent: a duplicate escrow_id with identical (account, amount) is
    /// a no-op; conflicting terms are rejected.
    pub fn escrow(&self, account_id: &str, amount: Balance, escrow_id: &str) -> Result<(), SwarmError> {
        if amount == 0 {
            return Err(SwarmError::ZeroAmount);
        }
        let _guard = self.lock.lock().expect("ledger lock poisoned");

        if let Some(existing) = self.read_escrow(escrow_id)? {
            if existing.account_id == account_id && existing.amount == amount {
                return Ok(()); // retry of the same escrow
            }
            return Err(SwarmError::EscrowConflict(escrow_id.to_string()));
        }

        let mut account = self
            .read_account(account_id)?
            .ok_or_else(|| SwarmError::UnknownAccount(account_id.to_string()))?;
        if account.balance < amount {
            return Err(SwarmError::InsufficientBalance {
                need: amount,
                have: account.balance,
            });
        }
        account.balance -= amount;
        account.locked += amount;
        self.write_account(&account)?;
        self.write_escrow(&Escrow {
            escrow_id: escrow_id.to_string(),
            account_id: account_id.to_string(),
            amount,
            state: EscrowState::Held,
        })?;
        self.record_op(account_id, "ESCROW", amount, json!({"escrow_id": escrow_id}))?;
        Ok(())
    }

    /// Release a held escrow to `to`. The whole read-check-write runs under
    /// the ledger lock, so of N concurrent releases exactly one succeeds and
    /// the rest see `EscrowAlreadyReleased`.
    pub fn release_escrow(&self, escrow_id: &str, to: &str) -> Result<Balance, SwarmError> {
        let _guard = self.lock.lock().expect("ledger lock poisoned");

        let mut escrow = self
            .read_escrow(escrow_id)?
            .ok_or_else(|| SwarmError::EscrowNotFound(escrow_id.to_string()))?;
        if escrow.state != EscrowState::Held {
            return Err(SwarmError::EscrowAlreadyReleased(escrow_id.to_string()));
        }

        let mut holder = self
            .read_account(&escrow.account_id)?
            .ok_or_else(|| SwarmError::UnknownAccount(escrow.account_id.clone()))?;
        // Locked always covers held escrows; a shortfall means corruption.
        if holder.locked < escrow.amount {
            return Err(SwarmError::Storage(format!(
                "escrow {escrow_id} exceeds locked funds of {}",
                escrow.account_id
            )));
        }
        holder.locked -= escrow.amount;

        let mut recipient = match self.read_account(to)? {
            Some(acc) => acc,
            None => Account {
                account_id: to.to_string(),
                balance: 0,
                locked: 0,
                unbonding: 0,
            },
        };

        escrow.state = EscrowState::Released;
        if recipient.account_id == holder.account_id {
            holder.balance += escrow.amount;
        } else {
            recipient.balance += escrow.amount;
            self.write_account(&recipient)?;
        }
        self.write_account(&holder)?;
        self.write_escrow(&escrow)?;
        self.record_op(
            &escrow.account_id,
            "RELEASE",
            escrow.amount,
            json!({"escrow_id": escrow_id, "to_account": to}),
        )?;
        Ok(escrow.amount)
    }

    /// Burn a held escrow: the bond leaves circulation entirely.
    pub fn burn_escrow(&self, escrow_id: &str) -> Result<Balance, SwarmError> {
        let _guard = self.lock.lock().expect("ledger lock poisoned");

        let mut escrow = self
            .read_escrow(escrow_id)?
            .ok_or_else(|| SwarmError::EscrowNotFound(escrow_id.to_string()))?;
        if escrow.state != EscrowState::Held {
            return Err(SwarmError::EscrowAlreadyReleased(escrow_id.to_string()));
        }
        let mut holder = self
            .read_account(&escrow.account_id)?
            .ok_or_else(|| SwarmError::UnknownAccount(escrow.account_id.clone()))?;
        if holder.locked < escrow.amount {
            return Err(SwarmError::Storage(format!(
                "escrow {escrow_id} exceeds locked funds of {}",
                escrow.account_id
            )));
        }
        holder.locked -= escrow.amount;
        escrow.state = EscrowState::Cancelled;
        self.write_account(&holder)?;
        self.write_escrow(&escrow)?;
        self.set_supply(self.total_supply().saturating_sub(escrow.amount))?;
        self.record_op(&escrow.account_id, "BURN", escrow.amount, json!({"escrow_id": escrow_id}))?;
        Ok(escrow.amount)
    }

    pub fn get_escrow(&self, escrow_id: &str) -> Result<Option<Escrow>, SwarmError> {
        self.read_escrow(escrow_id)
    }

    // ── Slashing ─────────────────────────────────────────────────────────────

    /// Remove `amount` from an account's staked credits. The slashed sum
    /// leaves circulation until `credit_slashed` redistributes a share.
    pub fn slash_stake(&self, account_id: &str, amount: Balance) -> Result<(), SwarmError> {
        if amount == 0 {
            return Ok(());
        }
        let _guard = self.lock.lock().expect("ledger lock poisoned");
        let mut account = self
            .read_account(account_id)?
            .ok_or_else(|| SwarmError::UnknownAccount(account_id.to_string()))?;
        if account.locked < amount {
            return Err(SwarmError::InsufficientStake {
                need: amount,
                have: account.locked,
            });
        }
        account.locked -= amount;
        self.write_account(&account)?;
        self.set_supply(self.total_supply().saturating_sub(amount))?;
        self.record_op(account_id, "SLASH", amount, json!({}))?;
        info!(account_id, amount, "stake slashed");
        Ok(())
    }

    /// Credit a share of previously slashed credits back into circulation
    /// (challenger rewards, honest-verifier distribution).
    pub(crate) fn credit_slashed(
        &self,
        account_id: &str,
        amount: Balance,
        metadata: Value,
    ) -> Result<(), SwarmError> {
        if amount == 0 {
            return Ok(());
        }
        let _guard = self.lock.lock().expect("ledger lock poisoned");
        let mut account = match self.read_account(account_id)? {
            Some(acc) => acc,
            None => Account {
                account_id: account_id.to_string(),
                balance: 0,
                locked: 0,
                unbonding: 0,
            },
        };
        account.balance += amount;
        self.write_account(&account)?;
        self.set_supply(self.total_supply() + amount)?;
        self.record_op(account_id, "SLASH_DISTRIBUTION", amount, metadata)?;
        Ok(())
    }

    // ── Stake moves (used by StakeManager) ───────────────────────────────────

    pub(crate) fn stake_move(&self, account_id: &str, amount: Balance) -> Result<(), SwarmError> {
        let _guard = self.lock.lock().expect("ledger lock poisoned");
        let mut account = self
            .read_account(account_id)?
            .ok_or_else(|| SwarmError::UnknownAccount(account_id.to_string()))?;
        if account.balance < amount {
            return Err(SwarmError::InsufficientBalance {
                need: amount,
                have: account.balance,
            });
        }
        account.balance -= amount;
        account.locked += amount;
        self.write_account(&account)?;
        self.record_op(account_id, "STAKE", amount, json!({}))?;
        Ok(())
    }

    pub(crate) fn unstake_move(
        &self,
        account_id: &str,
        amount: Balance,
        unbonding_id: &str,
        completes_at_ns: i64,
    ) -> Result<(), SwarmError> {
        let _guard = self.lock.lock().expect("ledger lock poisoned");
        let mut account = self
            .read_account(account_id)?
            .ok_or_else(|| SwarmError::UnknownAccount(account_id.to_string()))?;
        if account.locked < amount {
            return Err(SwarmError::InsufficientStake {
                need: amount,
                have: account.locked,
            });
        }
        account.locked -= amount;
        account.unbonding += amount;
        self.write_account(&account)?;
        self.record_op(
            account_id,
            "UNSTAKE",
            amount,
            json!({"unbonding_id": unbonding_id, "completes_at_ns": completes_at_ns}),
        )?;
        Ok(())
    }

    pub(crate) fn complete_unbonding_move(
        &self,
        account_id: &str,
        amount: Balance,
        unbonding_id: &str,
    ) -> Result<(), SwarmError> {
        let _guard = self.lock.lock().expect("ledger lock poisoned");
        let mut account = self
            .read_account(account_id)?
            .ok_or_else(|| SwarmError::UnknownAccount(account_id.to_string()))?;
        if account.unbonding < amount {
            return Err(SwarmError::Storage(format!(
                "unbonding record {unbonding_id} exceeds unbonding funds"
            )));
        }
        account.unbonding -= amount;
        account.balance += amount;
        self.write_account(&account)?;
        self.record_op(
            account_id,
            "COMPLETE_UNBONDING",
            amount,
            json!({"unbonding_id": unbonding_id}),
        )?;
        Ok(())
    }

    // ── Audit trail ──────────────────────────────────────────────────────────

    /// All operations touching `account_id`, oldest first.
    pub fn operations_for(&self, account_id: &str) -> Result<Vec<LedgerOp>, SwarmError> {
        let mut out = Vec::new();
        for item in self.operations.iter() {
            let (_, bytes) = item.map_err(storage)?;
            let op: LedgerOp = serde_json::from_slice(&bytes)?;
            if op.account == account_id {
                out.push(op);
            }
        }
        Ok(out)
    }

    // ── Internals (callers hold the lock) ────────────────────────────────────

    fn read_account(&self, account_id: &str) -> Result<Option<Account>, SwarmError> {
        match self.accounts.get(account_id.as_bytes()).map_err(storage)? {
            Some(bytes) => Ok(Some(
                bincode::deserialize(&bytes).map_err(|e| SwarmError::Serialization(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    fn write_account(&self, account: &Account) -> Result<(), SwarmError> {
        let bytes =
            bincode::serialize(account).map_err(|e| SwarmError::Serialization(e.to_string()))?;
        self.accounts
            .insert(account.account_id.as_bytes(), bytes)
            .map_err(storage)?;
        Ok(())
    }

    fn read_escrow(&self, escrow_id: &str) -> Result<Option<Escrow>, SwarmError> {
        match self.escrows.get(escrow_id.as_bytes()).map_err(storage)? {
            Some(bytes) => Ok(Some(
                bincode::deserialize(&bytes).map_err(|e| SwarmError::Serialization(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    fn write_escrow(&self, escrow: &Escrow) -> Result<(), SwarmError> {
        let bytes =
            bincode::serialize(escrow).map_err(|e| SwarmError::Serialization(e.to_string()))?;
        self.escrows
            .insert(escrow.escrow_id.as_bytes(), bytes)
            .map_err(storage)?;
        Ok(())
    }

    fn set_supply(&self, value: Balance) -> Result<(), SwarmError> {
        self.meta
            .insert(SUPPLY_KEY, &value.to_be_bytes())
            .map_err(storage)?;
        Ok(())
    }

    fn record_op(
        &self,
        account: &str,
        op_type: &str,
        amount: Balance,
        metadata: Value,
    ) -> Result<(), SwarmError> {
        let op = LedgerOp {
            op_id: Uuid::new_v4().to_string(),
            account: account.to_string(),
            op_type: op_type.to_string(),
            amount,
            timestamp_ns: now_ns(),
            metadata,
        };
        let mut key = op.timestamp_ns.to_be_bytes().to_vec();
        key.extend_from_slice(op.op_id.as_bytes());
        self.operations
            .insert(key, serde_json::to_vec(&op)?)
            .map_err(storage)?;
        Ok(())
    }
}
