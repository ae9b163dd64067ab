use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use swarm_core::types::{Balance, TimestampNs};
use swarm_core::now_ns;

const DISAGREEMENT_THRESHOLD: f64 = 0.3;
const CONFIDENCE_THRESHOLD: f64 = 0.7;
const HIGH_VALUE_BOND: Balance = 500;

/// Where a disputed challenge goes next.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscalationLevel {
    /// Pull more verifiers to break the disagreement.
    VerifierConsensus,
    /// Confidence too low for automation; a human decides.
    HumanReview,
    /// Stakes high enough for a governance vote.
    GovernanceVote,
}

/// One verifier's judgement of a challenge.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VerifierVerdict {
    pub verifier_id: String,
    /// True when the verifier finds the challenge upheld.
    pub is_valid: bool,
    /// Confidence in [0, 1].
    pub confidence: f64,
    pub reasoning: Option<String>,
}

/// An escalated case awaiting resolution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EscalationCase {
    pub escalation_id: String,
    pub challenge_id: String,
    pub level: EscalationLevel,
    pub verdicts: Vec<VerifierVerdict>,
    pub reason: String,
    pub created_at_ns: TimestampNs,
    pub resolved: bool,
}

/// Detects disputed verifications and routes them up the escalation
/// ladder: ≥ 30% dissent → more verifiers; average confidence < 70% →
/// human review; bond ≥ 500 → governance vote.
pub struct EscalationHandler {
    cases: Mutex<HashMap<String, EscalationCase>>,
}

impl EscalationHandler {
    pub fn new() -> Self {
        Self {
            cases: Mutex::new(HashMap::new()),
        }
    }

    /// Decide whether `verdicts` on a challenge warrant escalation.
    pub fn check_escalation(
        &self,
        verdicts: &[VerifierVerdict],
        bond_amount: Balance,
    ) -> Option<(EscalationLevel, String)> {
        if verdicts.is_empty() {
            return None;
        }

        let upheld = verdicts.iter().filter(|v| v.is_valid).count();
        let total = verdicts.len();
        let dissent = upheld.min(total - upheld) as f64 / total as f64;
        if dissent >= DISAGREEMENT_THRESHOLD {
            return Some((
                EscalationLevel::VerifierConsensus,
                format!("verifier disagreement: {:.0}%", dissent * 100.0),
            ));
        }

        let avg_confidence = verdicts.iter().map(|v| v.confidence).sum::<f64>() / total as f64;
        if avg_confidence < CONFIDENCE_THRESHOLD {
            return Some((
                EscalationLevel::HumanReview,
                format!("low confidence: {:.0}%", avg_confidence * 100.0),
            ));
        }

        if bond_amount >= HIGH_VALUE_BOND {
            return Some((
                EscalationLevel::GovernanceVote,
                format!("high-value bond: {bond_amount} credits"),
            ));
        }
        None
    }

    /// Open an escalation case when the verdicts warrant one.
    pub fn escalate_if_disputed(
        &self,
        challenge_id: &str,
        verdicts: &[VerifierVerdict],
        bond_amount: Balance,
    ) -> Option<EscalationCase> {
        let (level, reason) = self.check_escalation(verdicts, bond_amount)?;
        let case = EscalationCase {
            escalation_id: Uuid::new_v4().to_string(),
            challenge_id: challenge_id.to_string(),
            level,
            verdicts: verdicts.to_vec(),
            reason: reason.clone(),
            created_at_ns: now_ns(),
            resolved: false,
        };
        info!(challenge_id, ?level, reason = %reason, "challenge escalated");
        self.cases
            .lock()
            .expect("escalation lock poisoned")
            .insert(case.escalation_id.clone(), case.clone());
        Some(case)
    }

    pub fn get_case(&self, escalation_id: &str) -> Option<EscalationCase> {
        self.cases
            .lock()
            .expect("escalation lock poisoned")
            .get(escalation_id)
            .cloned()
    }

    pub fn resolve(&self, escalation_id: &str) -> bool {
        let mut cases = self.cases.lock().expect("escalation lock poisoned");
        match cases.get_mut(escalation_id) {
            Some(case) if !case.resolved => {
                case.resolved = true;
                true
            }
            _ => false,
        }
    }

    pub fn open_cases(&self) -> Vec<EscalationCase> {
        self.cases
            .lock()
            .expect("escalation lock poisoned")
            .values()
            .filter(|c| !c.resolved)
            .cloned()
            .collect()
    }
}

impl Default for EscalationHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verdict(id: &str, valid: bool, confidence: f64) -> VerifierVerdict {
        VerifierVerdict {
            verifier_id: id.into(),
            is_valid: valid,
            confidence,
            reasoning: None,
        }
    }

    #[test]
    fn unanimous_confident_cheap_case_stays_put() {
        let handler = EscalationHandler::new();
        let verdicts = vec![
            verdict("v1", true, 0.9),
            verdict("v2", true, 0.95),
            verdict("v3", true, 0.85),
        ];
        assert!(handler.check_escalation(&verdicts, 100).is_none());
    }

    #[test]
    fn dissent_escalates_to_more_verifiers() {
        let handler = EscalationHandler::new();
        let verdicts = vec![
            verdict("v1", true, 0.9),
            verdict("v2", false, 0.9),
            verdict("v3", true, 0.9),
        ];
        let (level, _) = handler.check_escalation(&verdicts, 100).unwrap();
        assert_eq!(level, EscalationLevel::VerifierConsensus);
    }

    #[test]
    fn low_confidence_goes_to_human_review() {
        let handler = EscalationHandler::new();
        let verdicts = vec![verdict("v1", true, 0.5), verdict("v2", true, 0.6)];
        let (level, _) = handler.check_escalation(&verdicts, 100).unwrap();
        assert_eq!(level, EscalationLevel::HumanReview);
    }

    #[test]
    fn big_bond_goes_to_governance() {
        let handler = EscalationHandler::new();
        let verdicts = vec![verdict("v1", true, 0.95), verdict("v2", true, 0.9)];
        let (level, _) = handler.check_escalation(&verdicts, 500).unwrap();
        assert_eq!(level, EscalationLevel::GovernanceVote);
    }

    #[test]
    fn escalated_case_is_tracked_until_resolved() {
        let handler = EscalationHandler::new();
        let verdicts = vec![verdict("v1", true, 0.4)];
        let case = handler.escalate_if_disputed("c1", &verdicts, 10).unwrap();
        assert_eq!(handler.open_cases().len(), 1);
        assert!(handler.resolve(&case.escalation_id));
        assert!(!handler.resolve(&case.escalation_id));
        assert!(handler.open_cases().is_empty());
    }

    #[test]
    fn empty_verdicts_never_escalate() {
        let handler = EscalationHandler::new();
        assert!(handler.check_escalation(&[], 10_000).is_none());
    }
}
