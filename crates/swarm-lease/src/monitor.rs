use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use swarm_core::constants::LEASE_CHECK_INTERVAL_SECS;
use swarm_core::SwarmError;

use crate::manager::{Lease, LeaseManager, ReleaseReason};

/// How the monitor announces a terminated lease. The coordinator's
/// transport implements this by signing and publishing a RELEASE envelope;
/// the monitor itself never mutates task state directly.
#[async_trait]
pub trait ReleasePublisher: Send + Sync {
    async fn publish_release(&self, lease: &Lease, reason: ReleaseReason)
        -> Result<(), SwarmError>;
}

/// Background worker that scans leases every `check_interval` and releases
/// the expired ones. Holds no lock while publishing; each deletion is a
/// per-lease atomic remove done by the manager before the RELEASE goes out.
pub struct LeaseMonitor {
    manager: Arc<LeaseManager>,
    publisher: Arc<dyn ReleasePublisher>,
    check_interval: Duration,
}

impl LeaseMonitor {
    pub fn new(manager: Arc<LeaseManager>, publisher: Arc<dyn ReleasePublisher>) -> Self {
        Self {
            manager,
            publisher,
            check_interval: Duration::from_secs(LEASE_CHECK_INTERVAL_SECS),
        }
    }

    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    /// One scan cycle: scavenge expired leases and publish a RELEASE for
    /// each. Idempotent — an empty table is a no-op.
    pub async fn check_expired_leases(&self) -> Result<usize, SwarmError> {
        let scavenged = self.manager.scavenge_expired()?;
        let count = scavenged.len();
        for (lease, reason) in scavenged {
            info!(
                task_id = %lease.task_id,
                worker_id = %lease.worker_id,
                reason = reason.as_str(),
                "releasing expired lease"
            );
            if let Err(e) = self.publisher.publish_release(&lease, reason).await {
                // The lease is already gone; the RELEASE will be regenerated
                // by the next claimant's timeout if this publish is lost.
                warn!(error = %e, task_id = %lease.task_id, "failed to publish RELEASE");
            }
        }
        Ok(count)
    }

    /// Run the scan loop forever on the runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.check_interval);
            loop {
                ticker.tick().await;
                if let Err(e) = self.check_expired_leases().await {
                    warn!(error = %e, "lease scan failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingPublisher {
        released: Mutex<Vec<(Lease, ReleaseReason)>>,
    }

    #[async_trait]
    impl ReleasePublisher for RecordingPublisher {
        async fn publish_release(
            &self,
            lease: &Lease,
            reason: ReleaseReason,
        ) -> Result<(), SwarmError> {
            self.released.lock().unwrap().push((lease.clone(), reason));
            Ok(())
        }
    }

    fn setup(name: &str) -> (Arc<LeaseManager>, Arc<RecordingPublisher>, LeaseMonitor) {
        let dir = std::env::temp_dir().join(format!("swarm_monitor_test_{name}"));
        let _ = std::fs::remove_dir_all(&dir);
        let manager = Arc::new(LeaseManager::open(&dir).unwrap());
        let publisher = Arc::new(RecordingPublisher {
            released: Mutex::new(Vec::new()),
        });
        let publisher_dyn: Arc<dyn ReleasePublisher> = publisher.clone();
        let monitor = LeaseMonitor::new(Arc::clone(&manager), publisher_dyn);
        (manager, publisher, monitor)
    }

    #[tokio::test]
    async fn expired_lease_released_with_timeout() {
        let (manager, publisher, monitor) = setup("timeout");
        let lease = manager.create_lease("task-exp", "worker", 0, 30).unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let count = monitor.check_expired_leases().await.unwrap();
        assert_eq!(count, 1);

        let released = publisher.released.lock().unwrap();
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].0.lease_id, lease.lease_id);
        assert_eq!(released[0].1, ReleaseReason::Timeout);
        drop(released);

        assert!(manager.get_lease(&lease.lease_id).unwrap().is_none());
    }

    #[tokio::test]
    async fn active_lease_untouched() {
        let (manager, publisher, monitor) = setup("active");
        manager.create_lease("task-ok", "worker", 3_600, 3_600).unwrap();
        let count = monitor.check_expired_leases().await.unwrap();
        assert_eq!(count, 0);
        assert!(publisher.released.lock().unwrap().is_empty());
        assert!(manager.lease_for_task("task-ok").unwrap().is_some());
    }

    #[tokio::test]
    async fn empty_table_is_noop() {
        let (_, publisher, monitor) = setup("empty");
        assert_eq!(monitor.check_expired_leases().await.unwrap(), 0);
        assert!(publisher.released.lock().unwrap().is_empty());
    }
}
