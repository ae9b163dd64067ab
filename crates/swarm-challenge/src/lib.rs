pub mod abuse;
pub mod bonds;
pub mod escalation;
pub mod outcomes;
pub mod proofs;
pub mod queue;
pub mod window;

pub use abuse::{AbuseDetector, ChallengerStats};
pub use bonds::{bond_for, ComplexityLevel};
pub use escalation::{EscalationHandler, EscalationLevel, VerifierVerdict};
pub use outcomes::{ChallengeOutcome, OutcomeHandler, OutcomeResult};
pub use proofs::{ProofSchema, ProofType};
pub use queue::{ChallengeQueue, ChallengeStatus, QueuedChallenge};
pub use window::{ChallengeWindows, WindowInfo};
