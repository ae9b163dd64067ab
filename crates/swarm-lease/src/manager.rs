use std::path::Path;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use swarm_core::types::{TaskId, TimestampNs};
use swarm_core::{now_ns, SwarmError};

/// Why a lease was terminated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseReason {
    Timeout,
    HeartbeatMiss,
}

impl ReleaseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseReason::Timeout => "timeout",
            ReleaseReason::HeartbeatMiss => "heartbeat_miss",
        }
    }
}

/// A worker's exclusive hold on one task.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Lease {
    pub lease_id: String,
    pub task_id: TaskId,
    pub worker_id: String,
    pub ttl_seconds: u64,
    pub heartbeat_interval: u64,
    pub opened_at_ns: TimestampNs,
    pub last_heartbeat_ns: TimestampNs,
}

impl Lease {
    /// A lease expires when its TTL elapses or an expected heartbeat is
    /// missed.
    pub fn expiry_reason(&self, now: TimestampNs) -> Option<ReleaseReason> {
        if now - self.opened_at_ns > (self.ttl_seconds as i64) * 1_000_000_000 {
            return Some(ReleaseReason::Timeout);
        }
        if self.heartbeat_interval > 0
            && now - self.last_heartbeat_ns > (self.heartbeat_interval as i64) * 1_000_000_000
        {
            return Some(ReleaseReason::HeartbeatMiss);
        }
        None
    }

    pub fn is_expired(&self, now: TimestampNs) -> bool {
        self.expiry_reason(now).is_some()
    }
}

/// Durable lease table. Invariant: at most one non-expired lease per
/// task_id.
///
/// Trees:
///   leases  — lease_id bytes → bincode(Lease)
///   by_task — task_id bytes  → lease_id bytes
pub struct LeaseManager {
    _db: sled::Db,
    leases: sled::Tree,
    by_task: sled::Tree,
    write_lock: Mutex<()>,
}

fn storage(e: sled::Error) -> SwarmError {
    SwarmError::Storage(e.to_string())
}

impl LeaseManager {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SwarmError> {
        let db = sled::open(path).map_err(storage)?;
        let leases = db.open_tree("leases").map_err(storage)?;
        let by_task = db.open_tree("by_task").map_err(storage)?;
        Ok(Self {
            _db: db,
            leases,
            by_task,
            write_lock: Mutex::new(()),
        })
    }

    /// Open a lease on `task_id` for `worker_id`. Fails if another live
    /// lease holds the task; an expired leftover is replaced.
    pub fn create_lease(
        &self,
        task_id: &str,
        worker_id: &str,
        ttl_seconds: u64,
        heartbeat_interval: u64,
    ) -> Result<Lease, SwarmError> {
        let _guard = self.write_lock.lock().expect("lease lock poisoned");
        let now = now_ns();

        if let Some(existing) = self.lease_for_task_locked(task_id)? {
            if !existing.is_expired(now) {
                return Err(SwarmError::TaskAlreadyLeased(task_id.to_string()));
            }
            self.delete_locked(&existing.lease_id)?;
        }

        let lease = Lease {
            lease_id: Uuid::new_v4().to_string(),
            task_id: task_id.to_string(),
            worker_id: worker_id.to_string(),
            ttl_seconds,
            heartbeat_interval,
            opened_at_ns: now,
            last_heartbeat_ns: now,
        };
        let bytes =
            bincode::serialize(&lease).map_err(|e| SwarmError::Serialization(e.to_string()))?;
        self.leases
            .insert(lease.lease_id.as_bytes(), bytes)
            .map_err(storage)?;
        self.by_task
            .insert(task_id.as_bytes(), lease.lease_id.as_bytes())
            .map_err(storage)?;
        self._db.flush().map_err(storage)?;

        info!(task_id, worker_id, ttl_seconds, "lease opened");
        Ok(lease)
    }

    /// Record a heartbeat. Unknown leases are an error — the worker's hold
    /// was already scavenged.
    pub fn heartbeat(&self, lease_id: &str) -> Result<(), SwarmError> {
        let _guard = self.write_lock.lock().expect("lease lock poisoned");
        let mut lease = self
            .read_lease(lease_id)?
            .ok_or_else(|| SwarmError::LeaseNotFound(lease_id.to_string()))?;
        lease.last_heartbeat_ns = now_ns();
        let bytes =
            bincode::serialize(&lease).map_err(|e| SwarmError::Serialization(e.to_string()))?;
        self.leases
            .insert(lease_id.as_bytes(), bytes)
            .map_err(storage)?;
        Ok(())
    }

    pub fn get_lease(&self, lease_id: &str) -> Result<Option<Lease>, SwarmError> {
        self.read_lease(lease_id)
    }

    pub fn lease_for_task(&self, task_id: &str) -> Result<Option<Lease>, SwarmError> {
        let _guard = self.write_lock.lock().expect("lease lock poisoned");
        self.lease_for_task_locked(task_id)
    }

    /// Drop a lease. Idempotent: deleting a missing lease is a no-op.
    pub fn delete_lease(&self, lease_id: &str) -> Result<(), SwarmError> {
        let _guard = self.write_lock.lock().expect("lease lock poisoned");
        self.delete_locked(lease_id)
    }

    pub fn all_leases(&self) -> Result<Vec<Lease>, SwarmError> {
        let mut out = Vec::new();
        for item in self.leases.iter() {
            let (_, bytes) = item.map_err(storage)?;
            out.push(
                bincode::deserialize(&bytes).map_err(|e| SwarmError::Serialization(e.to_string()))?,
            );
        }
        Ok(out)
    }

    /// Remove every expired lease, returning each with its expiry reason.
    pub fn scavenge_expired(&self) -> Result<Vec<(Lease, ReleaseReason)>, SwarmError> {
        let now = now_ns();
        let mut scavenged = Vec::new();
        for lease in self.all_leases()? {
            if let Some(reason) = lease.expiry_reason(now) {
                self.delete_lease(&lease.lease_id)?;
                debug!(task_id = %lease.task_id, reason = reason.as_str(), "lease scavenged");
                scavenged.push((lease, reason));
            }
        }
        Ok(scavenged)
    }

    fn lease_for_task_locked(&self, task_id: &str) -> Result<Option<Lease>, SwarmError> {
        match self.by_task.get(task_id.as_bytes()).map_err(storage)? {
            Some(lease_id) => self.read_lease(&String::from_utf8_lossy(&lease_id)),
            None => Ok(None),
        }
    }

    fn read_lease(&self, lease_id: &str) -> Result<Option<Lease>, SwarmError> {
        match self.leases.get(lease_id.as_bytes()).map_err(storage)? {
            Some(bytes) => Ok(Some(
                bincode::deserialize(&bytes).map_err(|e| SwarmError::Serialization(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    fn delete_locked(&self, lease_id: &str) -> Result<(), SwarmError> {
        if let Some(lease) = self.read_lease(lease_id)? {
            self.by_task.remove(lease.task_id.as_bytes()).map_err(storage)?;
            self.leases.remove(lease_id.as_bytes()).map_err(storage)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_manager(name: &str) -> LeaseManager {
        let dir = std::env::temp_dir().join(format!("swarm_lease_test_{name}"));
        let _ = std::fs::remove_dir_all(&dir);
        LeaseManager::open(&dir).expect("open temp lease db")
    }

    #[test]
    fn one_live_lease_per_task() {
        let mgr = temp_manager("one_per_task");
        mgr.create_lease("task-1", "worker-a", 300, 30).unwrap();
        let err = mgr.create_lease("task-1", "worker-b", 300, 30).unwrap_err();
        assert!(matches!(err, SwarmError::TaskAlreadyLeased(_)));
    }

    #[test]
    fn expired_lease_can_be_replaced() {
        let mgr = temp_manager("replace");
        mgr.create_lease("task-1", "worker-a", 0, 0).unwrap();
        // TTL 0 expires immediately; a new claim takes over.
        let lease = mgr.create_lease("task-1", "worker-b", 300, 30).unwrap();
        assert_eq!(lease.worker_id, "worker-b");
    }

    #[test]
    fn ttl_zero_expires_with_timeout_reason() {
        let mgr = temp_manager("ttl_zero");
        let lease = mgr.create_lease("task-exp", "worker", 0, 30).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let scavenged = mgr.scavenge_expired().unwrap();
        assert_eq!(scavenged.len(), 1);
        assert_eq!(scavenged[0].0.lease_id, lease.lease_id);
        assert_eq!(scavenged[0].1, ReleaseReason::Timeout);
        assert!(mgr.get_lease(&lease.lease_id).unwrap().is_none());
    }

    #[test]
    fn missed_heartbeat_reported_as_heartbeat_miss() {
        let mgr = temp_manager("miss");
        let lease = mgr.create_lease("task-hb", "worker", 3_600, 0).unwrap();
        // heartbeat_interval 0 disables heartbeat expectations; TTL holds.
        assert!(mgr.get_lease(&lease.lease_id).unwrap().is_some());

        let mut hb = lease.clone();
        hb.heartbeat_interval = 1;
        hb.last_heartbeat_ns -= 2_000_000_000;
        assert_eq!(hb.expiry_reason(now_ns()), Some(ReleaseReason::HeartbeatMiss));
    }

    #[test]
    fn heartbeat_keeps_lease_alive() {
        let mgr = temp_manager("keepalive");
        let lease = mgr.create_lease("task-ka", "worker", 3_600, 3_600).unwrap();
        mgr.heartbeat(&lease.lease_id).unwrap();
        let refreshed = mgr.get_lease(&lease.lease_id).unwrap().unwrap();
        assert!(refreshed.last_heartbeat_ns >= lease.last_heartbeat_ns);
    }

    #[test]
    fn delete_is_idempotent() {
        let mgr = temp_manager("idempotent_delete");
        mgr.delete_lease("no-such-lease").unwrap();
        let lease = mgr.create_lease("task-d", "worker", 300, 30).unwrap();
        mgr.delete_lease(&lease.lease_id).unwrap();
        mgr.delete_lease(&lease.lease_id).unwrap();
        assert!(mgr.lease_for_task("task-d").unwrap().is_none());
    }
}
