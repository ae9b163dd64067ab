use std::path::Path;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use swarm_core::types::{Balance, TimestampNs};
use swarm_core::{now_ns, SwarmError};

/// Lifecycle of a queued challenge. Transitions are one-way:
/// queued → verifying → verified | failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Queued,
    Verifying,
    Verified,
    Failed,
}

/// A challenge waiting for verifier attention.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueuedChallenge {
    pub challenge_id: String,
    pub task_id: String,
    pub commit_id: String,
    pub challenger_id: String,
    pub proof_data: Value,
    pub bond_amount: Balance,
    pub queued_at_ns: TimestampNs,
    pub status: ChallengeStatus,
    pub verified_at_ns: Option<TimestampNs>,
    pub verification_result: Option<Value>,
}

impl QueuedChallenge {
    /// Priority = bond + age_hours × 10. Bigger bonds verify first; age
    /// keeps small bonds from starving.
    pub fn priority_score(&self, now: TimestampNs) -> f64 {
        let age_hours = ((now - self.queued_at_ns).max(0) as f64) / 3600e9;
        self.bond_amount as f64 + age_hours * 10.0
    }
}

/// Durable priority queue of challenges awaiting verification.
pub struct ChallengeQueue {
    _db: sled::Db,
    tree: sled::Tree,
    lock: Mutex<()>,
}

fn storage(e: sled::Error) -> SwarmError {
    SwarmError::Storage(e.to_string())
}

impl ChallengeQueue {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SwarmError> {
        let db = sled::open(path).map_err(storage)?;
        let tree = db.open_tree("challenge_queue").map_err(storage)?;
        Ok(Self {
            _db: db,
            tree,
            lock: Mutex::new(()),
        })
    }

    /// Enqueue a challenge for verification.
    pub fn add_challenge(
        &self,
        challenge_id: &str,
        task_id: &str,
        commit_id: &str,
        challenger_id: &str,
        proof_data: Value,
        bond_amount: Balance,
    ) -> Result<QueuedChallenge, SwarmError> {
        let challenge = QueuedChallenge {
            challenge_id: challenge_id.to_string(),
            task_id: task_id.to_string(),
            commit_id: commit_id.to_string(),
            challenger_id: challenger_id.to_string(),
            proof_data,
            bond_amount,
            queued_at_ns: now_ns(),
            status: ChallengeStatus::Queued,
            verified_at_ns: None,
            verification_result: None,
        };
        let _guard = self.lock.lock().expect("queue lock poisoned");
        self.write(&challenge)?;
        info!(challenge_id, task_id, bond_amount, "challenge queued");
        Ok(challenge)
    }

    /// Highest-priority queued challenge, if any. Ties break on enqueue
    /// time, oldest first.
    pub fn next_challenge(&self) -> Result<Option<QueuedChallenge>, SwarmError> {
        let now = now_ns();
        let mut best: Option<QueuedChallenge> = None;
        for challenge in self.all()? {
            if challenge.status != ChallengeStatus::Queued {
                continue;
            }
            best = match best {
                None => Some(challenge),
                Some(current) => {
                    let (cp, np) = (current.priority_score(now), challenge.priority_score(now));
                    if np > cp || (np == cp && challenge.queued_at_ns < current.queued_at_ns) {
                        Some(challenge)
                    } else {
                        Some(current)
                    }
                }
            };
        }
        Ok(best)
    }

    /// queued → verifying. False if the challenge is unknown or already
    /// past queued.
    pub fn mark_verifying(&self, challenge_id: &str) -> Result<bool, SwarmError> {
        self.advance(challenge_id, ChallengeStatus::Queued, ChallengeStatus::Verifying, None)
    }

    /// verifying → verified, recording the verdict payload.
    pub fn mark_verified(&self, challenge_id: &str, result: Value) -> Result<bool, SwarmError> {
        self.advance(
            challenge_id,
            ChallengeStatus::Verifying,
            ChallengeStatus::Verified,
            Some(result),
        )
    }

    /// verifying → failed, recording the error.
    pub fn mark_failed(&self, challenge_id: &str, error: &str) -> Result<bool, SwarmError> {
        self.advance(
            challenge_id,
            ChallengeStatus::Verifying,
            ChallengeStatus::Failed,
            Some(serde_json::json!({"error": error})),
        )
    }

    pub fn get(&self, challenge_id: &str) -> Result<Option<QueuedChallenge>, SwarmError> {
        match self.tree.get(challenge_id.as_bytes()).map_err(storage)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All queued challenges ordered by descending priority.
    pub fn queued_by_priority(&self) -> Result<Vec<QueuedChallenge>, SwarmError> {
        let now = now_ns();
        let mut queued: Vec<QueuedChallenge> = self
            .all()?
            .into_iter()
            .filter(|c| c.status == ChallengeStatus::Queued)
            .collect();
        queued.sort_by(|a, b| {
            b.priority_score(now)
                .total_cmp(&a.priority_score(now))
                .then(a.queued_at_ns.cmp(&b.queued_at_ns))
        });
        Ok(queued)
    }

    pub fn queue_size(&self, status: Option<ChallengeStatus>) -> Result<usize, SwarmError> {
        Ok(self
            .all()?
            .into_iter()
            .filter(|c| status.map_or(true, |s| c.status == s))
            .count())
    }

    fn advance(
        &self,
        challenge_id: &str,
        from: ChallengeStatus,
        to: ChallengeStatus,
        result: Option<Value>,
    ) -> Result<bool, SwarmError> {
        let _guard = self.lock.lock().expect("queue lock poisoned");
        let Some(mut challenge) = self.get(challenge_id)? else {
            return Ok(false);
        };
        if challenge.status != from {
            return Ok(false);
        }
        challenge.status = to;
        if result.is_some() {
            challenge.verified_at_ns = Some(now_ns());
            challenge.verification_result = result;
        }
        self.write(&challenge)?;
        Ok(true)
    }

    fn all(&self) -> Result<Vec<QueuedChallenge>, SwarmError> {
        let mut out = Vec::new();
        for item in self.tree.iter() {
            let (_, bytes) = item.map_err(storage)?;
            out.push(serde_json::from_slice(&bytes)?);
        }
        Ok(out)
    }

    fn write(&self, challenge: &QueuedChallenge) -> Result<(), SwarmError> {
        self.tree
            .insert(challenge.challenge_id.as_bytes(), serde_json::to_vec(challenge)?)
            .map_err(storage)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_queue(name: &str) -> ChallengeQueue {
        let dir = std::env::temp_dir().join(format!("swarm_queue_test_{name}"));
        let _ = std::fs::remove_dir_all(&dir);
        ChallengeQueue::open(&dir).unwrap()
    }

    #[test]
    fn bigger_bonds_come_first() {
        let queue = temp_queue("priority");
        queue.add_challenge("c1", "t1", "m1", "ch", json!({}), 10).unwrap();
        queue.add_challenge("c2", "t1", "m1", "ch", json!({}), 100).unwrap();
        queue.add_challenge("c3", "t1", "m1", "ch", json!({}), 50).unwrap();

        let next = queue.next_challenge().unwrap().unwrap();
        assert_eq!(next.challenge_id, "c2");
        let order: Vec<String> = queue
            .queued_by_priority()
            .unwrap()
            .into_iter()
            .map(|c| c.challenge_id)
            .collect();
        assert_eq!(order, vec!["c2", "c3", "c1"]);
    }

    #[test]
    fn status_transitions_are_one_way() {
        let queue = temp_queue("transitions");
        queue.add_challenge("c1", "t1", "m1", "ch", json!({}), 10).unwrap();

        assert!(queue.mark_verifying("c1").unwrap());
        // A second claim on the same challenge fails.
        assert!(!queue.mark_verifying("c1").unwrap());

        assert!(queue.mark_verified("c1", json!({"upheld": true})).unwrap());
        // Terminal states are sticky.
        assert!(!queue.mark_verifying("c1").unwrap());
        assert!(!queue.mark_failed("c1", "nope").unwrap());

        let done = queue.get("c1").unwrap().unwrap();
        assert_eq!(done.status, ChallengeStatus::Verified);
        assert!(done.verified_at_ns.is_some());
    }

    #[test]
    fn verified_challenges_leave_the_queue() {
        let queue = temp_queue("drain");
        queue.add_challenge("c1", "t1", "m1", "ch", json!({}), 10).unwrap();
        queue.mark_verifying("c1").unwrap();
        queue.mark_verified("c1", json!({})).unwrap();
        assert!(queue.next_challenge().unwrap().is_none());
        assert_eq!(queue.queue_size(Some(ChallengeStatus::Verified)).unwrap(), 1);
    }

    #[test]
    fn failure_records_error() {
        let queue = temp_queue("failure");
        queue.add_challenge("c1", "t1", "m1", "ch", json!({}), 10).unwrap();
        queue.mark_verifying("c1").unwrap();
        queue.mark_failed("c1", "verifier crashed").unwrap();
        let failed = queue.get("c1").unwrap().unwrap();
        assert_eq!(failed.status, ChallengeStatus::Failed);
        assert_eq!(
            failed.verification_result.unwrap()["error"],
            json!("verifier crashed")
        );
    }
}
