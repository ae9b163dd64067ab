pub mod identity;
pub mod ledger;
pub mod payout;
pub mod pools;
pub mod relationships;
pub mod reputation;
pub mod selection;
pub mod slashing;
pub mod stake;

pub use identity::{DidManager, IdentityConfig};
pub use ledger::{Account, CreditLedger, Escrow, EscrowState};
pub use payout::{PayoutDistributor, PayoutShare, ShareType};
pub use pools::{VerifierMetadata, VerifierPool, VerifierRecord};
pub use relationships::{PartyInfo, RelationshipDetector};
pub use reputation::ReputationTracker;
pub use selection::{DiversityConstraints, VerifierSelector};
pub use slashing::{SlashResult, SlashingRules};
pub use stake::{StakeManager, UnbondingRecord};
