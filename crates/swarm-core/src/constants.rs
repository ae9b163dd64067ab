//! ─── Swarm Protocol Constants ───────────────────────────────────────────────
//!
//! Credit economy, quorum thresholds, and protocol timing defaults shared by
//! every component.

use crate::types::Balance;

// ── Credit supply ────────────────────────────────────────────────────────────

/// Hard cap on circulating credits. Σ balances + Σ locked + Σ unbonding may
/// never exceed this.
pub const MAX_SUPPLY: Balance = 1_000_000_000_000;

/// Account allowed to mint by default.
pub const SYSTEM_ACCOUNT: &str = "system";

/// Sink account for burned credits.
pub const BURN_ACCOUNT: &str = "burn";

// ── Verifiers / quorum ───────────────────────────────────────────────────────

/// Minimum stake for a verifier to count as active.
pub const MIN_VERIFIER_STAKE: Balance = 1_000;

/// Fraction of active verifiers required to attest a proposal.
pub const K_PLAN_ALPHA: f64 = 0.3;

/// Upper bound on K_plan.
pub const K_PLAN_TARGET: u32 = 5;

/// Below this many active verifiers the network is in bootstrap mode and
/// K_plan collapses to 1.
pub const BOOTSTRAP_VERIFIER_THRESHOLD: u32 = 10;

// ── Leases ───────────────────────────────────────────────────────────────────

/// Default lease TTL granted by CLAIM (seconds).
pub const DEFAULT_LEASE_TTL_SECS: u64 = 300;

/// Default expected heartbeat interval (seconds).
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Lease monitor scan period (seconds).
pub const LEASE_CHECK_INTERVAL_SECS: u64 = 5;

// ── Challenges ───────────────────────────────────────────────────────────────

/// Default challenge window after FINALIZE (seconds). 24 hours.
pub const CHALLENGE_WINDOW_SECS: u64 = 86_400;

/// Maximum size of a challenge evidence blob (bytes).
pub const MAX_PROOF_SIZE_BYTES: usize = 10 * 1024;

/// Maximum gas a challenger may estimate for proof verification.
pub const MAX_PROOF_GAS: u64 = 100_000;

/// Challenger reward on an upheld challenge, as a multiple of the bond.
pub const UPHELD_REWARD_MULTIPLIER: Balance = 2;

/// Fraction of a dishonest verifier's stake slashed on an upheld challenge.
pub const VERIFIER_SLASH_PERCENT: u64 = 50;

/// Fee retained when a challenger withdraws (percent of bond).
pub const WITHDRAWAL_FEE_PERCENT: u64 = 10;

/// Slash distribution: challenger / honest verifiers / burn, in percent.
/// Shares are computed with integer arithmetic; the burn share absorbs
/// rounding so the three always sum to the total.
pub const SLASH_CHALLENGER_PERCENT: u64 = 50;
pub const SLASH_HONEST_PERCENT: u64 = 40;

// ── Envelopes / policy ───────────────────────────────────────────────────────

/// Maximum canonical payload size (bytes). 64 KiB.
pub const MAX_PAYLOAD_BYTES: usize = 64 * 1024;

/// Default gas budget for one policy evaluation.
pub const POLICY_GAS_LIMIT: u64 = 100_000;

// ── Staking ──────────────────────────────────────────────────────────────────

/// Unbonding period before unstaked credits return to balance (days).
pub const UNBONDING_DAYS: u64 = 7;

// ── Payouts ──────────────────────────────────────────────────────────────────

/// Payouts wait 2 × T_challenge after task completion before executing.
pub const T_CHALLENGE_NS: i64 = 5 * 60 * 1_000_000_000;

// ── External call timeouts ───────────────────────────────────────────────────

/// CAS (IPFS gateway) read timeout (seconds).
pub const CAS_TIMEOUT_SECS: u64 = 5;

/// Consensus register call timeout (seconds).
pub const CONSENSUS_TIMEOUT_SECS: u64 = 2;

/// Ledger storage call timeout (seconds).
pub const LEDGER_TIMEOUT_SECS: u64 = 2;

/// Consecutive IPFS timeouts that open the circuit breaker.
pub const CAS_BREAKER_THRESHOLD: u32 = 3;

/// Circuit breaker cooldown before IPFS is retried (seconds).
pub const CAS_BREAKER_COOLDOWN_SECS: u64 = 60;
