use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use swarm_core::types::{Lamport, NeedId, ProposalId, TimestampNs};
use swarm_core::SwarmError;
use swarm_crypto::sha256_bytes;

use crate::epochs::EpochManager;

/// The winning (need, proposal) selection. At most one exists per need_id,
/// globally.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DecideRecord {
    pub need_id: NeedId,
    pub proposal_id: ProposalId,
    pub epoch: u64,
    pub lamport: Lamport,
    pub k_plan: u32,
    pub decider_id: String,
    pub timestamp_ns: TimestampNs,
}

/// Shard bucket for a need: first byte of SHA-256(need_id), 256 uniform
/// buckets.
pub fn bucket_for_need(need_id: &str) -> u8 {
    sha256_bytes(need_id.as_bytes())[0]
}

fn decide_key(need_id: &str) -> String {
    format!("decide/bucket-{:03}/{}", bucket_for_need(need_id), need_id)
}

/// At-most-once DECIDE register.
pub trait DecideRegister: Send + Sync {
    /// Attempt to record a DECIDE.
    ///
    /// Returns `Some(record)` on success or on an idempotent retry (an
    /// existing record with the same proposal_id and epoch), `None` when the
    /// attempt is stale (epoch below current) or a conflicting record
    /// already exists.
    fn try_decide(&self, record: &DecideRecord) -> Result<Option<DecideRecord>, SwarmError>;

    /// Read the existing DECIDE for a need, if any.
    fn get_decide(&self, need_id: &str) -> Result<Option<DecideRecord>, SwarmError>;

    /// Every record in the register. Input to partition-heal merging.
    fn all_decides(&self) -> Result<Vec<DecideRecord>, SwarmError>;
}

/// Single-node register: sled `compare_and_swap` gives the atomic
/// set-if-absent. This is the bootstrap variant; a replicated KV behind the
/// same trait serves multi-node deployments.
pub struct LocalRegister {
    _db: sled::Db,
    tree: sled::Tree,
    epochs: Arc<EpochManager>,
}

fn storage(e: sled::Error) -> SwarmError {
    SwarmError::Storage(e.to_string())
}

impl LocalRegister {
    pub fn open<P: AsRef<Path>>(path: P, epochs: Arc<EpochManager>) -> Result<Self, SwarmError> {
        let db = sled::open(path).map_err(storage)?;
        let tree = db.open_tree("decides").map_err(storage)?;
        Ok(Self {
            _db: db,
            tree,
            epochs,
        })
    }
}

impl DecideRegister for LocalRegister {
    fn try_decide(&self, record: &DecideRecord) -> Result<Option<DecideRecord>, SwarmError> {
        // Epoch fence: attempts from a previous epoch lost their right to
        // decide when the partition healed.
        let current = self.epochs.current_epoch();
        if record.epoch < current {
            warn!(
                need_id = %record.need_id,
                got = record.epoch,
                current,
                "rejected stale DECIDE attempt"
            );
            return Ok(None);
        }

        let key = decide_key(&record.need_id);
        let bytes =
            bincode::serialize(record).map_err(|e| SwarmError::Serialization(e.to_string()))?;

        match self
            .tree
            .compare_and_swap(key.as_bytes(), None as Option<&[u8]>, Some(bytes))
            .map_err(storage)?
        {
            Ok(()) => {
                self.tree.flush().map_err(storage)?;
                info!(
                    need_id = %record.need_id,
                    proposal_id = %record.proposal_id,
                    epoch = record.epoch,
                    "DECIDE recorded"
                );
                Ok(Some(record.clone()))
            }
            Err(cas) => {
                let existing_bytes = cas
                    .current
                    .ok_or_else(|| SwarmError::Storage("CAS raced with deletion".into()))?;
                let existing: DecideRecord = bincode::deserialize(&existing_bytes)
                    .map_err(|e| SwarmError::Serialization(e.to_string()))?;
                if existing.proposal_id == record.proposal_id && existing.epoch == record.epoch {
                    // Idempotent retry: same tuple, same answer.
                    debug!(need_id = %record.need_id, "idempotent DECIDE retry");
                    Ok(Some(existing))
                } else {
                    debug!(
                        need_id = %record.need_id,
                        winner = %existing.proposal_id,
                        loser = %record.proposal_id,
                        "DECIDE conflict"
                    );
                    Ok(None)
                }
            }
        }
    }

    fn get_decide(&self, need_id: &str) -> Result<Option<DecideRecord>, SwarmError> {
        match self.tree.get(decide_key(need_id).as_bytes()).map_err(storage)? {
            Some(bytes) => Ok(Some(
                bincode::deserialize(&bytes).map_err(|e| SwarmError::Serialization(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    fn all_decides(&self) -> Result<Vec<DecideRecord>, SwarmError> {
        let mut out = Vec::new();
        for item in self.tree.iter() {
            let (_, bytes) = item.map_err(storage)?;
            out.push(
                bincode::deserialize(&bytes).map_err(|e| SwarmError::Serialization(e.to_string()))?,
            );
        }
        Ok(out)
    }
}

/// Select the DECIDE backend.
///
/// `RAFT_CONSENSUS` requests the replicated register; that backend lives
/// outside this crate, so when it is not wired in the caller gets the
/// single-node register and `replicated = false` — the mode is always
/// reported, never silently downgraded.
pub fn open_register<P: AsRef<Path>>(
    path: P,
    epochs: Arc<EpochManager>,
) -> Result<(Arc<dyn DecideRegister>, bool), SwarmError> {
    let replicated_requested = matches!(
        std::env::var("RAFT_CONSENSUS").as_deref(),
        Ok("1") | Ok("true") | Ok("TRUE") | Ok("yes")
    );
    if replicated_requested {
        warn!("RAFT_CONSENSUS requested but no replicated backend is wired; using local register");
    }
    let register = LocalRegister::open(path, epochs)?;
    info!(replicated = false, "DECIDE register ready");
    Ok((Arc::new(register), false))
}
