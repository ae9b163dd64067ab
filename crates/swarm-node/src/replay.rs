//! Deterministic replay: verify a thread by replaying its audit log.
//!
//! Checks, in order:
//!   1. every record's signature
//!   2. Lamport monotonicity across envelope events
//!   3. at most one DECIDE envelope per need
//!   4. policy compliance of every envelope
//!
//! The audit log is the sole input; arrival order on the wire plays no
//! part.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use swarm_audit::AuditLog;
use swarm_cas::CasStore;
use swarm_core::SwarmError;
use swarm_crypto::verify_record;
use swarm_policy::{Envelope, GateEnforcer};

/// Replay every audit record for `thread_id` in `log_path`. Returns true
/// iff all checks pass. `cas` is consulted for COMMIT artifact existence;
/// without one, threads containing COMMITs fail policy validation, which
/// is the fail-closed behavior we want.
pub async fn replay_thread<P: AsRef<Path>>(
    log_path: P,
    thread_id: &str,
    cas: Option<Arc<dyn CasStore>>,
) -> Result<bool, SwarmError> {
    let events: Vec<Value> = AuditLog::read_log(log_path)?
        .into_iter()
        .filter(|e| e["thread_id"].as_str() == Some(thread_id))
        .collect();

    if events.is_empty() {
        warn!(thread_id, "no events found for thread");
        return Ok(false);
    }
    info!(thread_id, events = events.len(), "replaying thread");

    // 1. Signatures.
    let bad_signatures = events.iter().filter(|e| !verify_record(e)).count();
    if bad_signatures > 0 {
        warn!(bad_signatures, "signature verification failed");
        return Ok(false);
    }

    // Envelope events: audit payloads that parse as envelopes.
    let envelopes: Vec<Envelope> = events
        .iter()
        .filter_map(|e| Envelope::from_value(&e["payload"]).ok())
        .collect();

    // 2. Lamport ordering: envelope timestamps never regress along the
    // log. Equal or lower lamports mean a clock failed to observe.
    let mut last_lamport = 0u64;
    for envelope in &envelopes {
        if envelope.lamport <= last_lamport {
            warn!(
                lamport = envelope.lamport,
                last = last_lamport,
                "lamport ordering violated"
            );
            return Ok(false);
        }
        last_lamport = envelope.lamport;
    }

    // 3. DECIDE uniqueness per need.
    let mut decides: HashMap<String, u32> = HashMap::new();
    for envelope in &envelopes {
        if envelope.kind == swarm_core::Verb::Decide {
            let need = envelope.payload["need_id"]
                .as_str()
                .unwrap_or("<unknown>")
                .to_string();
            let count = decides.entry(need.clone()).or_insert(0);
            *count += 1;
            if *count > 1 {
                warn!(need_id = %need, "multiple DECIDE envelopes for one need");
                return Ok(false);
            }
        }
    }

    // 4. Policy compliance.
    let gate = GateEnforcer::new(cas);
    for envelope in &envelopes {
        let decision = gate.ingress_validate(envelope).await;
        if !decision.allowed {
            warn!(
                kind = %envelope.kind,
                reasons = decision.reasons.join("; "),
                "policy violation during replay"
            );
            return Ok(false);
        }
    }

    info!(
        thread_id,
        envelopes = envelopes.len(),
        decides = decides.len(),
        "replay verified"
    );
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use swarm_audit::AuditLog;
    use swarm_clock::LamportClock;
    use swarm_core::Verb;
    use swarm_crypto::KeyPair;
    use swarm_policy::sign_envelope;

    struct Harness {
        audit: AuditLog,
        keypair: Arc<KeyPair>,
        clock: LamportClock,
    }

    fn harness(name: &str) -> Harness {
        let dir = std::env::temp_dir().join(format!("swarm_replay_test_{name}"));
        let _ = std::fs::remove_dir_all(&dir);
        let keypair = Arc::new(KeyPair::generate());
        Harness {
            audit: AuditLog::open(dir.join("logs"), Arc::clone(&keypair)).unwrap(),
            keypair,
            clock: LamportClock::open(dir.join("lamport.json")).unwrap(),
        }
    }

    impl Harness {
        fn publish(&self, kind: Verb, thread: &str, payload: serde_json::Value) {
            let env = Envelope::build(kind, thread, payload, &self.keypair, &self.clock).unwrap();
            let signed = sign_envelope(&env, &self.keypair).unwrap();
            self.audit
                .log_event(thread, "thread.t.test", "BUS.PUBLISH", &signed.to_value())
                .unwrap();
        }
    }

    #[tokio::test]
    async fn clean_thread_replays_true() {
        let h = harness("clean");
        h.publish(Verb::Need, "T1", json!({"need_id": "N1"}));
        h.publish(Verb::Propose, "T1", json!({"need_id": "N1", "proposal_id": "P1"}));
        h.publish(Verb::Decide, "T1", json!({"need_id": "N1", "proposal_id": "P1"}));
        h.publish(Verb::Finalize, "T1", json!({"task_id": "W1"}));

        assert!(replay_thread(h.audit.path(), "T1", None).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_thread_replays_false() {
        let h = harness("unknown");
        h.publish(Verb::Need, "T1", json!({}));
        assert!(!replay_thread(h.audit.path(), "T-other", None).await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_decide_fails() {
        let h = harness("dup_decide");
        h.publish(Verb::Decide, "T1", json!({"need_id": "N1", "proposal_id": "P1"}));
        h.publish(Verb::Decide, "T1", json!({"need_id": "N1", "proposal_id": "P2"}));
        assert!(!replay_thread(h.audit.path(), "T1", None).await.unwrap());
    }

    #[tokio::test]
    async fn tampered_log_fails_signatures() {
        let h = harness("tampered");
        h.publish(Verb::Need, "T1", json!({"need_id": "N1"}));

        // Corrupt the payload in the log file.
        let text = std::fs::read_to_string(h.audit.path()).unwrap();
        let tampered = text.replace("\"N1\"", "\"N2\"");
        assert_ne!(text, tampered);
        std::fs::write(h.audit.path(), tampered).unwrap();

        assert!(!replay_thread(h.audit.path(), "T1", None).await.unwrap());
    }

    #[tokio::test]
    async fn lamport_regression_fails() {
        let h = harness("regression");
        // Build two envelopes, then log them out of order.
        let first = {
            let env = Envelope::build(Verb::Need, "T1", json!({}), &h.keypair, &h.clock).unwrap();
            sign_envelope(&env, &h.keypair).unwrap()
        };
        let second = {
            let env = Envelope::build(Verb::Propose, "T1", json!({"proposal_id": "P1"}), &h.keypair, &h.clock)
                .unwrap();
            sign_envelope(&env, &h.keypair).unwrap()
        };
        h.audit.log_event("T1", "s", "BUS.PUBLISH", &second.to_value()).unwrap();
        h.audit.log_event("T1", "s", "BUS.PUBLISH", &first.to_value()).unwrap();

        assert!(!replay_thread(h.audit.path(), "T1", None).await.unwrap());
    }
}
