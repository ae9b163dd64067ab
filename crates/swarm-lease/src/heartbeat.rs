use swarm_core::types::TimestampNs;
use swarm_core::SwarmError;

use crate::manager::{Lease, LeaseManager};

/// Heartbeat expectations for leased tasks.
///
/// A lease with `heartbeat_interval == 0` carries no heartbeat obligation;
/// otherwise the worker must check in at least once per interval or the
/// monitor releases the task.
pub struct HeartbeatProtocol<'a> {
    manager: &'a LeaseManager,
}

impl<'a> HeartbeatProtocol<'a> {
    pub fn new(manager: &'a LeaseManager) -> Self {
        Self { manager }
    }

    pub fn expects_heartbeat(&self, lease: &Lease) -> bool {
        lease.heartbeat_interval > 0
    }

    /// Deadline for the next heartbeat, or None when none is expected.
    pub fn next_expected_at(&self, lease: &Lease) -> Option<TimestampNs> {
        self.expects_heartbeat(lease)
            .then(|| lease.last_heartbeat_ns + (lease.heartbeat_interval as i64) * 1_000_000_000)
    }

    /// Record a worker heartbeat.
    pub fn record_heartbeat(&self, lease_id: &str) -> Result<(), SwarmError> {
        self.manager.heartbeat(lease_id)
    }
}
