use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;

use swarm_core::SwarmError;
use swarm_policy::Envelope;

/// Subject for thread traffic: `thread.{thread_id}.{role}`. Roles: need,
/// planner, worker, verifier.
pub fn thread_subject(thread_id: &str, role: &str) -> String {
    format!("thread.{thread_id}.{role}")
}

/// Subject for challenge traffic: `challenge.{challenge_id}.{phase}`.
pub fn challenge_subject(challenge_id: &str, phase: &str) -> String {
    format!("challenge.{challenge_id}.{phase}")
}

/// Message transport the core publishes through. Implementations are
/// external (NATS, gossip); delivery is at-least-once and MAY reorder —
/// replay reconstructs canonical order from Lamport timestamps, never from
/// arrival order.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn publish_envelope(
        &self,
        thread_id: &str,
        subject: &str,
        envelope: &Envelope,
    ) -> Result<(), SwarmError>;

    /// Subscribe to every subject. Callers filter by subject pattern.
    fn subscribe(&self) -> broadcast::Receiver<(String, Envelope)>;
}

/// In-process loopback transport for single-process deployments and tests.
pub struct LocalTransport {
    sender: broadcast::Sender<(String, Envelope)>,
}

impl LocalTransport {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::new(512)
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn publish_envelope(
        &self,
        thread_id: &str,
        subject: &str,
        envelope: &Envelope,
    ) -> Result<(), SwarmError> {
        debug!(thread_id, subject, kind = %envelope.kind, "publishing envelope");
        // A send error only means no subscriber is attached yet; the
        // envelope is still durably in the audit log.
        let _ = self.sender.send((subject.to_string(), envelope.clone()));
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<(String, Envelope)> {
        self.sender.subscribe()
    }
}
