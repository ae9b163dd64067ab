use std::path::Path;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::info;

use swarm_core::types::TimestampNs;
use swarm_core::{now_ns, SwarmError};

const STATE_KEY: &[u8] = b"epoch_state";

/// Durable epoch counter. Epochs fence stale decisions after a partition:
/// a DECIDE carrying an epoch below the current one is rejected.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EpochState {
    pub epoch_number: u64,
    pub started_at_ns: TimestampNs,
    pub coordinator_id: String,
}

pub struct EpochManager {
    _db: sled::Db,
    tree: sled::Tree,
    state: Mutex<EpochState>,
}

fn storage(e: sled::Error) -> SwarmError {
    SwarmError::Storage(e.to_string())
}

impl EpochManager {
    /// Open the epoch store at `path`, loading the persisted state or
    /// initializing epoch 1.
    pub fn open<P: AsRef<Path>>(path: P, coordinator_id: &str) -> Result<Self, SwarmError> {
        let db = sled::open(path).map_err(storage)?;
        let tree = db.open_tree("epoch_state").map_err(storage)?;

        let state = match tree.get(STATE_KEY).map_err(storage)? {
            Some(bytes) => {
                let state: EpochState = bincode::deserialize(&bytes)
                    .map_err(|e| SwarmError::Serialization(e.to_string()))?;
                info!(epoch = state.epoch_number, "loaded persisted epoch state");
                state
            }
            None => {
                let state = EpochState {
                    epoch_number: 1,
                    started_at_ns: now_ns(),
                    coordinator_id: coordinator_id.to_string(),
                };
                let bytes = bincode::serialize(&state)
                    .map_err(|e| SwarmError::Serialization(e.to_string()))?;
                tree.insert(STATE_KEY, bytes).map_err(storage)?;
                db.flush().map_err(storage)?;
                info!(epoch = 1, "initialized fresh epoch state");
                state
            }
        };

        Ok(Self {
            _db: db,
            tree,
            state: Mutex::new(state),
        })
    }

    pub fn current_epoch(&self) -> u64 {
        self.state.lock().expect("epoch lock poisoned").epoch_number
    }

    pub fn state(&self) -> EpochState {
        self.state.lock().expect("epoch lock poisoned").clone()
    }

    /// Fencing token for `epoch` (default: current): `epoch-{N}-{started_at}`.
    pub fn fence_token(&self, epoch: Option<u64>) -> String {
        let state = self.state.lock().expect("epoch lock poisoned");
        let epoch = epoch.unwrap_or(state.epoch_number);
        format!("epoch-{}-{}", epoch, state.started_at_ns)
    }

    /// A token is valid iff its epoch is at least `current_epoch`.
    pub fn validate_fence_token(token: &str, current_epoch: u64) -> bool {
        let mut parts = token.split('-');
        if parts.next() != Some("epoch") {
            return false;
        }
        match parts.next().and_then(|p| p.parse::<u64>().ok()) {
            Some(token_epoch) => token_epoch >= current_epoch,
            None => false,
        }
    }

    /// Advance to the next epoch and persist before returning. Called on
    /// partition heal (RECONCILE) to fence out the old partition's
    /// decisions.
    pub fn advance_epoch(&self, reason: &str) -> Result<u64, SwarmError> {
        let mut state = self.state.lock().expect("epoch lock poisoned");
        let old = state.epoch_number;
        state.epoch_number += 1;
        state.started_at_ns = now_ns();

        let bytes =
            bincode::serialize(&*state).map_err(|e| SwarmError::Serialization(e.to_string()))?;
        self.tree.insert(STATE_KEY, bytes).map_err(storage)?;
        self.tree.flush().map_err(storage)?;

        info!(from = old, to = state.epoch_number, reason, "advanced epoch");
        Ok(state.epoch_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("swarm_epoch_test_{name}"));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn starts_at_epoch_one() {
        let mgr = EpochManager::open(temp_dir("start"), "coord").unwrap();
        assert_eq!(mgr.current_epoch(), 1);
    }

    #[test]
    fn advance_is_monotonic_and_durable() {
        let dir = temp_dir("advance");
        {
            let mgr = EpochManager::open(&dir, "coord").unwrap();
            assert_eq!(mgr.advance_epoch("partition_heal").unwrap(), 2);
            assert_eq!(mgr.advance_epoch("partition_heal").unwrap(), 3);
        }
        // Survives restart.
        let reopened = EpochManager::open(&dir, "coord").unwrap();
        assert_eq!(reopened.current_epoch(), 3);
    }

    #[test]
    fn fence_tokens_validate_by_epoch() {
        let mgr = EpochManager::open(temp_dir("fence"), "coord").unwrap();
        let token = mgr.fence_token(None);
        assert!(EpochManager::validate_fence_token(&token, 1));

        mgr.advance_epoch("test").unwrap();
        // The old epoch-1 token is now stale.
        assert!(!EpochManager::validate_fence_token(&token, mgr.current_epoch()));
        let fresh = mgr.fence_token(None);
        assert!(EpochManager::validate_fence_token(&fresh, mgr.current_epoch()));
    }

    #[test]
    fn malformed_tokens_rejected() {
        assert!(!EpochManager::validate_fence_token("garbage", 1));
        assert!(!EpochManager::validate_fence_token("epoch-x-1", 1));
        assert!(!EpochManager::validate_fence_token("", 1));
    }
}
