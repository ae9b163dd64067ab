pub mod heartbeat;
pub mod manager;
pub mod monitor;

pub use heartbeat::HeartbeatProtocol;
pub use manager::{Lease, LeaseManager, ReleaseReason};
pub use monitor::{LeaseMonitor, ReleasePublisher};
