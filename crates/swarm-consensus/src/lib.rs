pub mod epochs;
pub mod merge;
pub mod quorum;
pub mod register;

pub use epochs::{EpochManager, EpochState};
pub use merge::{mark_orphaned, merge_on_heal, DecideConflict, MergeWinner};
pub use quorum::{escalate_k_result, k_plan, k_plan_with_bootstrap, QuorumTracker};
pub use register::{bucket_for_need, open_register, DecideRecord, DecideRegister, LocalRegister};
