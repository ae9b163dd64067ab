use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use swarm_clock::LamportClock;
use swarm_core::types::{Lamport, Sha256Hex, ThreadId, TimestampNs};
use swarm_core::{now_ns, SwarmError, Verb};
use swarm_crypto::{canonical_json, sha256_hex, sign_record, verify_record, KeyPair};

use crate::rules::current_policy_hash;

/// Signed message unit. The wire format is the canonical JSON of this
/// struct; the signature covers every field except the two `sig_*` fields.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub v: u32,
    pub id: String,
    pub thread_id: ThreadId,
    pub kind: Verb,
    pub lamport: Lamport,
    pub ts_ns: TimestampNs,
    pub sender_pk_b64: String,
    pub payload_hash: Sha256Hex,
    pub payload: Value,
    pub policy_engine_hash: String,
    pub nonce: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sig_pk_b64: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sig_b64: Option<String>,
}

impl Envelope {
    /// Construct an unsigned envelope with all defaults filled: v=1, fresh
    /// id and nonce, ts_ns now, lamport from the clock, payload hash over
    /// the canonical payload, and the active policy hash.
    pub fn build(
        kind: Verb,
        thread_id: impl Into<ThreadId>,
        payload: Value,
        sender: &KeyPair,
        clock: &LamportClock,
    ) -> Result<Self, SwarmError> {
        let lamport = clock.tick()?;
        Ok(Self {
            v: 1,
            id: Uuid::new_v4().to_string(),
            thread_id: thread_id.into(),
            kind,
            lamport,
            ts_ns: now_ns(),
            sender_pk_b64: sender.public_key_b64(),
            payload_hash: sha256_hex(&canonical_json(&payload)),
            payload,
            policy_engine_hash: current_policy_hash().to_string(),
            nonce: Uuid::new_v4().to_string(),
            sig_pk_b64: None,
            sig_b64: None,
        })
    }

    /// The envelope as a JSON value (the wire form).
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Parse an envelope from its wire form.
    pub fn from_value(value: &Value) -> Result<Self, SwarmError> {
        Ok(serde_json::from_value(value.clone())?)
    }

    /// Size in bytes of the canonical payload encoding.
    pub fn payload_size(&self) -> usize {
        canonical_json(&self.payload).len()
    }
}

/// Append an Ed25519 signature over the envelope body.
pub fn sign_envelope(envelope: &Envelope, keypair: &KeyPair) -> Result<Envelope, SwarmError> {
    let signed = sign_record(keypair, &envelope.to_value());
    Envelope::from_value(&signed)
}

/// Check signature validity, `lamport > 0`, and that `payload_hash` matches
/// the canonical payload.
pub fn verify_envelope(envelope: &Envelope) -> bool {
    if envelope.lamport == 0 {
        return false;
    }
    if envelope.payload_hash != sha256_hex(&canonical_json(&envelope.payload)) {
        return false;
    }
    verify_record(&envelope.to_value())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_clock(name: &str) -> LamportClock {
        let dir = std::env::temp_dir().join(format!("swarm_envelope_test_{name}"));
        let _ = std::fs::remove_dir_all(&dir);
        LamportClock::open(dir.join("lamport.json")).unwrap()
    }

    #[test]
    fn sign_verify_round_trip() {
        let kp = KeyPair::generate();
        let clock = temp_clock("round_trip");
        let env = Envelope::build(
            Verb::Need,
            "thread-1",
            json!({"task": "classify"}),
            &kp,
            &clock,
        )
        .unwrap();
        let signed = sign_envelope(&env, &kp).unwrap();
        assert!(verify_envelope(&signed));
    }

    #[test]
    fn mutation_breaks_verification() {
        let kp = KeyPair::generate();
        let clock = temp_clock("mutation");
        let env =
            Envelope::build(Verb::Commit, "thread-2", json!({"n": 7}), &kp, &clock).unwrap();
        let signed = sign_envelope(&env, &kp).unwrap();

        let mut tampered_payload = signed.clone();
        tampered_payload.payload = json!({"n": 8});
        assert!(!verify_envelope(&tampered_payload));

        let mut tampered_lamport = signed.clone();
        tampered_lamport.lamport += 1;
        assert!(!verify_envelope(&tampered_lamport));

        let mut zero_lamport = signed;
        zero_lamport.lamport = 0;
        assert!(!verify_envelope(&zero_lamport));
    }

    #[test]
    fn build_fills_defaults() {
        let kp = KeyPair::generate();
        let clock = temp_clock("defaults");
        let env = Envelope::build(Verb::Propose, "thread-3", json!({}), &kp, &clock).unwrap();
        assert_eq!(env.v, 1);
        assert!(env.lamport > 0);
        assert_eq!(env.policy_engine_hash, current_policy_hash());
        assert_ne!(env.id, env.nonce);
    }

    #[test]
    fn lamport_increases_per_envelope() {
        let kp = KeyPair::generate();
        let clock = temp_clock("lamport_seq");
        let a = Envelope::build(Verb::Need, "t", json!({}), &kp, &clock).unwrap();
        let b = Envelope::build(Verb::Propose, "t", json!({}), &kp, &clock).unwrap();
        assert!(b.lamport > a.lamport);
    }
}
