use thiserror::Error;

use crate::types::Balance;

#[derive(Debug, Error)]
pub enum SwarmError {
    // ── Policy / envelope errors ─────────────────────────────────────────────
    #[error("policy rejected envelope: {0}")]
    PolicyRejection(String),

    #[error("invalid signature")]
    InvalidSignature,

    #[error("payload too large: {got} bytes (max {max})")]
    PayloadTooLarge { got: usize, max: usize },

    #[error("kind not allowed: {0}")]
    KindNotAllowed(String),

    #[error("policy_engine_hash mismatch")]
    PolicyHashMismatch,

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("gas limit exceeded: used {used}, limit {limit}")]
    GasExhausted { used: u64, limit: u64 },

    #[error("COMMIT artifact not found in CAS: {0}")]
    ArtifactMissing(String),

    // ── Consensus errors ─────────────────────────────────────────────────────
    #[error("DECIDE conflict: need {need_id} already decided for proposal {existing_proposal}")]
    ConsensusConflict {
        need_id: String,
        existing_proposal: String,
    },

    #[error("stale fencing token: epoch {got} < current {current}")]
    StaleFencingToken { got: u64, current: u64 },

    // ── Ledger errors ────────────────────────────────────────────────────────
    #[error("insufficient balance: need {need} credits, have {have}")]
    InsufficientBalance { need: Balance, have: Balance },

    #[error("insufficient stake: need {need} credits, have {have}")]
    InsufficientStake { need: Balance, have: Balance },

    #[error("escrow already released: {0}")]
    EscrowAlreadyReleased(String),

    #[error("escrow id reused with conflicting terms: {0}")]
    EscrowConflict(String),

    #[error("escrow not found: {0}")]
    EscrowNotFound(String),

    #[error("minter not authorized: {0} (only system accounts may mint)")]
    UnauthorizedMinter(String),

    #[error("transfer recipient does not exist: {0}")]
    RecipientMissing(String),

    #[error("account already exists: {0}")]
    AccountExists(String),

    #[error("unknown account: {0}")]
    UnknownAccount(String),

    #[error("amount must be greater than zero")]
    ZeroAmount,

    #[error("supply cap exceeded: minting {mint} would pass MAX_SUPPLY")]
    SupplyCapExceeded { mint: Balance },

    // ── Challenge errors ─────────────────────────────────────────────────────
    #[error("rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    #[error("spam pattern detected: {0}")]
    SpamDetected(String),

    #[error("challenge window closed for task {0}")]
    WindowClosed(String),

    #[error("invalid proof: {0}")]
    InvalidProof(String),

    #[error("challenge not found: {0}")]
    ChallengeNotFound(String),

    // ── Leases ───────────────────────────────────────────────────────────────
    #[error("task already leased: {0}")]
    TaskAlreadyLeased(String),

    #[error("lease not found: {0}")]
    LeaseNotFound(String),

    // ── Identity ─────────────────────────────────────────────────────────────
    #[error("DID creation requires stake of at least {min} credits")]
    DidStakeTooLow { min: Balance },

    #[error("invalid proof-of-work for DID creation")]
    DidPowInvalid,

    // ── Transient / storage ──────────────────────────────────────────────────
    #[error("not found: {0}")]
    NotFound(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("{0}")]
    Other(String),
}

impl From<std::io::Error> for SwarmError {
    fn from(e: std::io::Error) -> Self {
        SwarmError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for SwarmError {
    fn from(e: serde_json::Error) -> Self {
        SwarmError::Serialization(e.to_string())
    }
}
