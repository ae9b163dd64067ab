use serde::{Deserialize, Serialize};
use std::fmt;

/// Credit amount in the smallest unit. u64 covers the full supply with room
/// to spare.
pub type Balance = u64;

/// Lamport logical timestamp (strictly positive on the wire).
pub type Lamport = u64;

/// Wall-clock nanoseconds since the Unix epoch.
pub type TimestampNs = i64;

/// Correlation id tying a sequence of envelopes to one NEED's lifecycle.
pub type ThreadId = String;

/// Subject of a plan operation.
pub type TaskId = String;

/// Root request id for a thread (at-most-once DECIDE key).
pub type NeedId = String;

/// Planner-assigned proposal id.
pub type ProposalId = String;

/// Agent identity: base64 of the Ed25519 public key.
pub type AgentId = String;

// ── TaskState ────────────────────────────────────────────────────────────────

/// Derived state of a task in the plan log. Advances monotonically in
/// lamport order and never regresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Draft,
    Decided,
    Verified,
    Final,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Draft => "DRAFT",
            TaskState::Decided => "DECIDED",
            TaskState::Verified => "VERIFIED",
            TaskState::Final => "FINAL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DRAFT" => Some(TaskState::Draft),
            "DECIDED" => Some(TaskState::Decided),
            "VERIFIED" => Some(TaskState::Verified),
            "FINAL" => Some(TaskState::Final),
            _ => None,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Sha256Hex ────────────────────────────────────────────────────────────────

/// 64-character lowercase hex SHA-256 digest. Content ids in the CAS,
/// payload hashes, and evidence hashes are all this type.
pub type Sha256Hex = String;

/// True iff `s` is a well-formed 64-char lowercase hex digest.
pub fn is_sha256_hex(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
