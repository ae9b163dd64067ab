use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use swarm_core::types::Lamport;
use swarm_core::SwarmError;
use swarm_plan::PlanLog;

use crate::register::DecideRecord;

/// Which side's DECIDE survives a partition-heal merge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeWinner {
    Local,
    Remote,
}

/// A conflicting pair of DECIDEs for one need, with its resolution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DecideConflict {
    pub need_id: String,
    pub local: DecideRecord,
    pub remote: DecideRecord,
    pub winner: MergeWinner,
    pub reason: String,
}

/// Deterministic merge rule: highest epoch wins; ties fall to the higher
/// lamport, then to the lexicographically smaller decider_id. Pure — the
/// same inputs resolve identically on every node, in either call order.
pub fn highest_epoch_wins(local: &DecideRecord, remote: &DecideRecord) -> MergeWinner {
    if local.epoch != remote.epoch {
        return if local.epoch > remote.epoch {
            MergeWinner::Local
        } else {
            MergeWinner::Remote
        };
    }
    if local.lamport != remote.lamport {
        return if local.lamport > remote.lamport {
            MergeWinner::Local
        } else {
            MergeWinner::Remote
        };
    }
    if local.decider_id < remote.decider_id {
        MergeWinner::Local
    } else {
        MergeWinner::Remote
    }
}

/// Cross two partitions' DECIDE sets after a heal and resolve every need
/// decided differently on each side.
pub fn merge_on_heal(
    local_decides: &[DecideRecord],
    remote_decides: &[DecideRecord],
) -> Vec<DecideConflict> {
    let local_by_need: HashMap<&str, &DecideRecord> =
        local_decides.iter().map(|d| (d.need_id.as_str(), d)).collect();
    let remote_by_need: HashMap<&str, &DecideRecord> =
        remote_decides.iter().map(|d| (d.need_id.as_str(), d)).collect();

    let mut conflicts = Vec::new();
    let mut needs: Vec<&str> = local_by_need
        .keys()
        .filter(|need| remote_by_need.contains_key(**need))
        .copied()
        .collect();
    needs.sort_unstable();

    for need_id in needs {
        let local = local_by_need[need_id];
        let remote = remote_by_need[need_id];
        if local.proposal_id == remote.proposal_id {
            continue; // Same decision on both sides.
        }
        let winner = highest_epoch_wins(local, remote);
        conflicts.push(DecideConflict {
            need_id: need_id.to_string(),
            local: local.clone(),
            remote: remote.clone(),
            winner,
            reason: format!("epoch {} vs {}", local.epoch, remote.epoch),
        });
    }

    if !conflicts.is_empty() {
        warn!(count = conflicts.len(), "DECIDE conflicts found on heal");
    }
    conflicts
}

/// Annotate the losing branch of a merge as orphaned in the plan log. The
/// task is kept for audit but may never advance again.
pub async fn mark_orphaned(
    loser: &DecideRecord,
    winning_epoch: u64,
    lamport: Lamport,
    plan: &PlanLog,
) -> Result<(), SwarmError> {
    plan.annotate_task(
        &loser.need_id,
        &loser.need_id,
        lamport,
        &loser.decider_id,
        json!({
            "orphaned": true,
            "orphaned_by_epoch": winning_epoch,
            "orphaned_proposal": loser.proposal_id.clone(),
        }),
    )
    .await?;
    info!(
        need_id = %loser.need_id,
        proposal_id = %loser.proposal_id,
        winning_epoch,
        "marked branch orphaned"
    );
    Ok(())
}
