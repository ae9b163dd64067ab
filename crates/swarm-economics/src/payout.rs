use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::info;

use swarm_core::constants::{BURN_ACCOUNT, T_CHALLENGE_NS};
use swarm_core::types::{Balance, TimestampNs};
use swarm_core::{now_ns, SwarmError};

use crate::ledger::CreditLedger;
use crate::relationships::RelationshipDetector;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShareType {
    Committee,
    Challenger,
    Burn,
}

/// One recipient's cut of a bounty.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PayoutShare {
    pub recipient_id: String,
    pub amount: Balance,
    pub share_type: ShareType,
}

/// Bounty distribution.
///
/// Without a challenge the committee splits the full bounty; with one, the
/// split is 50% challenger / 40% committee / 10% burn. Shares are integer
/// floors with the remainder assigned to the first listed recipient, so the
/// shares always sum exactly to the bounty.
pub struct PayoutDistributor {
    ledger: Arc<CreditLedger>,
    relationships: Arc<RelationshipDetector>,
    invalidated: Mutex<HashSet<String>>,
}

impl PayoutDistributor {
    pub fn new(ledger: Arc<CreditLedger>, relationships: Arc<RelationshipDetector>) -> Self {
        Self {
            ledger,
            relationships,
            invalidated: Mutex::new(HashSet::new()),
        }
    }

    /// Pure share computation.
    pub fn calculate_shares(
        &self,
        bounty_amount: Balance,
        committee: &[String],
        challenger: Option<&str>,
    ) -> Result<Vec<PayoutShare>, SwarmError> {
        if committee.is_empty() {
            return Err(SwarmError::Other("committee cannot be empty".into()));
        }
        if let Some(challenger) = challenger {
            if committee.iter().any(|m| m == challenger) {
                return Err(SwarmError::Other("challenger cannot sit on the committee".into()));
            }
        }

        let mut shares = Vec::new();
        match challenger {
            None => {
                split_equally(bounty_amount, committee, ShareType::Committee, &mut shares);
            }
            Some(challenger) => {
                let challenger_amount = bounty_amount * 50 / 100;
                let committee_total = bounty_amount * 40 / 100;
                let burn_amount = bounty_amount - challenger_amount - committee_total;

                shares.push(PayoutShare {
                    recipient_id: challenger.to_string(),
                    amount: challenger_amount,
                    share_type: ShareType::Challenger,
                });
                split_equally(committee_total, committee, ShareType::Committee, &mut shares);
                if burn_amount > 0 {
                    shares.push(PayoutShare {
                        recipient_id: BURN_ACCOUNT.to_string(),
                        amount: burn_amount,
                        share_type: ShareType::Burn,
                    });
                }
            }
        }
        Ok(shares)
    }

    /// Permanently block payouts for a task whose result was invalidated.
    pub fn mark_invalidated(&self, task_id: &str) {
        self.invalidated
            .lock()
            .expect("payout lock poisoned")
            .insert(task_id.to_string());
        info!(task_id, "payout blocked");
    }

    pub fn is_invalidated(&self, task_id: &str) -> bool {
        self.invalidated
            .lock()
            .expect("payout lock poisoned")
            .contains(task_id)
    }

    /// Payout preconditions: the challenge horizon (2 × T_challenge) has
    /// passed, the task was not invalidated, and no related parties link
    /// the challenger to the committee.
    pub fn can_payout(
        &self,
        task_id: &str,
        task_completion_ns: TimestampNs,
        committee: &[String],
        challenger: Option<&str>,
        now: Option<TimestampNs>,
    ) -> (bool, String) {
        if self.is_invalidated(task_id) {
            return (false, "task has been invalidated".into());
        }
        let now = now.unwrap_or_else(now_ns);
        let elapsed = now - task_completion_ns;
        let required = 2 * T_CHALLENGE_NS;
        if elapsed < required {
            return (
                false,
                format!("challenge period not elapsed: {elapsed} < {required} ns"),
            );
        }
        if let Some(challenger) = challenger {
            if committee.iter().any(|m| m == challenger)
                || self
                    .relationships
                    .detect_any_relationship(committee, challenger)
            {
                return (false, "related party conflict detected".into());
            }
        }
        (true, "OK".into())
    }

    /// Execute the payout: checks preconditions, computes shares, and moves
    /// the bounty from `payer` to each recipient (burn share included).
    pub fn execute_payout(
        &self,
        task_id: &str,
        payer: &str,
        bounty_amount: Balance,
        committee: &[String],
        task_completion_ns: TimestampNs,
        challenger: Option<&str>,
        now: Option<TimestampNs>,
    ) -> Result<Vec<PayoutShare>, SwarmError> {
        let (ok, reason) = self.can_payout(task_id, task_completion_ns, committee, challenger, now);
        if !ok {
            return Err(SwarmError::Other(format!("cannot execute payout: {reason}")));
        }

        let shares = self.calculate_shares(bounty_amount, committee, challenger)?;
        for share in &shares {
            self.ledger
                .transfer(payer, &share.recipient_id, share.amount, true)?;
        }
        info!(task_id, bounty_amount, recipients = shares.len(), "payout executed");
        Ok(shares)
    }
}

fn split_equally(
    total: Balance,
    recipients: &[String],
    share_type: ShareType,
    out: &mut Vec<PayoutShare>,
) {
    let per_member = total / recipients.len() as Balance;
    let remainder = total % recipients.len() as Balance;
    for (i, member) in recipients.iter().enumerate() {
        out.push(PayoutShare {
            recipient_id: member.clone(),
            amount: per_member + if i == 0 { remainder } else { 0 },
            share_type,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relationships::PartyInfo;

    fn setup(name: &str) -> (Arc<CreditLedger>, Arc<RelationshipDetector>, PayoutDistributor) {
        let dir = std::env::temp_dir().join(format!("swarm_payout_test_{name}"));
        let _ = std::fs::remove_dir_all(&dir);
        let ledger = Arc::new(CreditLedger::open(&dir).unwrap());
        let relationships = Arc::new(RelationshipDetector::new());
        let distributor = PayoutDistributor::new(Arc::clone(&ledger), Arc::clone(&relationships));
        (ledger, relationships, distributor)
    }

    fn committee(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("m{i}")).collect()
    }

    #[test]
    fn unchallenged_bounty_splits_across_committee() {
        let (_, _, distributor) = setup("no_challenge");
        let shares = distributor.calculate_shares(100, &committee(3), None).unwrap();
        let amounts: Vec<Balance> = shares.iter().map(|s| s.amount).collect();
        // 100 / 3 = 33 each; the first member takes the remainder of 1.
        assert_eq!(amounts, vec![34, 33, 33]);
        assert_eq!(amounts.iter().sum::<Balance>(), 100);
    }

    #[test]
    fn challenged_bounty_splits_fifty_forty_ten() {
        let (_, _, distributor) = setup("challenged");
        let shares = distributor
            .calculate_shares(1_000, &committee(2), Some("challenger"))
            .unwrap();
        assert_eq!(shares[0].amount, 500);
        assert_eq!(shares[0].share_type, ShareType::Challenger);
        let committee_total: Balance = shares
            .iter()
            .filter(|s| s.share_type == ShareType::Committee)
            .map(|s| s.amount)
            .sum();
        assert_eq!(committee_total, 400);
        let burn: Balance = shares
            .iter()
            .filter(|s| s.share_type == ShareType::Burn)
            .map(|s| s.amount)
            .sum();
        assert_eq!(burn, 100);
    }

    #[test]
    fn challenger_in_committee_rejected() {
        let (_, _, distributor) = setup("conflict");
        let members = vec!["a".to_string(), "b".to_string()];
        assert!(distributor.calculate_shares(100, &members, Some("a")).is_err());
    }

    #[test]
    fn payout_waits_for_challenge_horizon() {
        let (_, _, distributor) = setup("horizon");
        let now = now_ns();
        let (ok, reason) = distributor.can_payout("t1", now, &committee(1), None, Some(now + 1));
        assert!(!ok);
        assert!(reason.contains("challenge period"));

        let (ok, _) =
            distributor.can_payout("t1", now, &committee(1), None, Some(now + 2 * T_CHALLENGE_NS));
        assert!(ok);
    }

    #[test]
    fn invalidated_task_never_pays() {
        let (_, _, distributor) = setup("invalidated");
        distributor.mark_invalidated("t1");
        let now = now_ns();
        let (ok, reason) =
            distributor.can_payout("t1", now, &committee(1), None, Some(now + 10 * T_CHALLENGE_NS));
        assert!(!ok);
        assert!(reason.contains("invalidated"));
    }

    #[test]
    fn related_parties_block_payout() {
        let (_, relationships, distributor) = setup("related");
        relationships.register_party(PartyInfo {
            account_id: "challenger".into(),
            org_domain: Some("acme.com".into()),
            ..Default::default()
        });
        relationships.register_party(PartyInfo {
            account_id: "m0".into(),
            org_domain: Some("acme.com".into()),
            ..Default::default()
        });
        let now = now_ns();
        let (ok, reason) = distributor.can_payout(
            "t1",
            now,
            &committee(2),
            Some("challenger"),
            Some(now + 2 * T_CHALLENGE_NS),
        );
        assert!(!ok);
        assert!(reason.contains("related party"));
    }

    #[test]
    fn execute_payout_moves_funds() {
        let (ledger, _, distributor) = setup("execute");
        ledger.create_account("bounty-pool", 1_000, "system").unwrap();
        let now = now_ns();
        let shares = distributor
            .execute_payout(
                "t1",
                "bounty-pool",
                1_000,
                &committee(2),
                now,
                Some("challenger"),
                Some(now + 2 * T_CHALLENGE_NS),
            )
            .unwrap();
        assert_eq!(ledger.get_balance("challenger"), 500);
        assert_eq!(ledger.get_balance("m0"), 200);
        assert_eq!(ledger.get_balance("m1"), 200);
        assert_eq!(ledger.get_balance(BURN_ACCOUNT), 100);
        assert_eq!(ledger.get_balance("bounty-pool"), 0);
        assert_eq!(shares.len(), 4);
    }
}
