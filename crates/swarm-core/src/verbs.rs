use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Every message kind the protocol accepts. The dispatcher matches on this
/// exhaustively; an unknown wire string never reaches a handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verb {
    Need,
    Propose,
    Claim,
    ClaimExtended,
    Commit,
    Attest,
    Decide,
    Finalize,
    Yield,
    Release,
    Challenge,
    Invalidate,
    Reconcile,
    Checkpoint,
    UpdatePlan,
    AttestPlan,
}

impl Verb {
    /// All verbs, in protocol order. The policy allowlist and the policy
    /// version hash are derived from this list.
    pub const ALL: [Verb; 16] = [
        Verb::Need,
        Verb::Propose,
        Verb::Claim,
        Verb::ClaimExtended,
        Verb::Commit,
        Verb::Attest,
        Verb::Decide,
        Verb::Finalize,
        Verb::Yield,
        Verb::Release,
        Verb::Challenge,
        Verb::Invalidate,
        Verb::Reconcile,
        Verb::Checkpoint,
        Verb::UpdatePlan,
        Verb::AttestPlan,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Need => "NEED",
            Verb::Propose => "PROPOSE",
            Verb::Claim => "CLAIM",
            Verb::ClaimExtended => "CLAIM_EXTENDED",
            Verb::Commit => "COMMIT",
            Verb::Attest => "ATTEST",
            Verb::Decide => "DECIDE",
            Verb::Finalize => "FINALIZE",
            Verb::Yield => "YIELD",
            Verb::Release => "RELEASE",
            Verb::Challenge => "CHALLENGE",
            Verb::Invalidate => "INVALIDATE",
            Verb::Reconcile => "RECONCILE",
            Verb::Checkpoint => "CHECKPOINT",
            Verb::UpdatePlan => "UPDATE_PLAN",
            Verb::AttestPlan => "ATTEST_PLAN",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verb {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Verb::ALL
            .iter()
            .copied()
            .find(|v| v.as_str() == s)
            .ok_or(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_strings_round_trip() {
        for v in Verb::ALL {
            assert_eq!(v.as_str().parse::<Verb>(), Ok(v));
        }
        assert!("FROBNICATE".parse::<Verb>().is_err());
    }

    #[test]
    fn serde_uses_wire_strings() {
        let json = serde_json::to_string(&Verb::ClaimExtended).unwrap();
        assert_eq!(json, "\"CLAIM_EXTENDED\"");
        let back: Verb = serde_json::from_str("\"UPDATE_PLAN\"").unwrap();
        assert_eq!(back, Verb::UpdatePlan);
    }
}
