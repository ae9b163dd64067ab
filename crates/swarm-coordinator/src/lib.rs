pub mod coordinator;
pub mod handlers;
pub mod transport;

pub use coordinator::{Coordinator, CoordinatorConfig};
pub use transport::{challenge_subject, thread_subject, LocalTransport, Transport};
