use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use swarm_cas::CasStore;
use swarm_core::constants::{MAX_PAYLOAD_BYTES, POLICY_GAS_LIMIT};
use swarm_core::Verb;
use tracing::debug;

use crate::envelope::{verify_envelope, Envelope};
use crate::gas::{GasMeter, GAS_COMPARISON, GAS_CRYPTO, GAS_FIELD_ACCESS, GAS_SET_MEMBERSHIP};
use crate::rules::current_policy_hash;

/// Which of the three gates produced a decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyGate {
    /// Cheap pre-publish validation with a bounded cache.
    Preflight,
    /// Authoritative on-receive validation; never cached.
    Ingress,
    /// Pre-attest validation of COMMIT envelopes against telemetry.
    CommitGate,
}

/// Outcome of one policy evaluation. Two evaluations of the same envelope
/// at the same gate return identical `allowed` / `reasons` /
/// `policy_version`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub gate: PolicyGate,
    pub allowed: bool,
    pub reasons: Vec<String>,
    pub gas_used: u64,
    pub policy_version: String,
}

/// Resource telemetry measured while a task executed, compared against the
/// worker's claims at the commit gate.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct CommitTelemetry {
    pub cpu_time_ms: u64,
    pub memory_mb: u64,
    pub disk_bytes: u64,
}

const PREFLIGHT_CACHE_CAP: usize = 1024;

/// The three-gate policy engine.
///
/// Handlers never see an envelope the ingress gate has not passed; the
/// dispatcher enforces that invariant centrally.
pub struct GateEnforcer {
    cas: Option<Arc<dyn CasStore>>,
    gas_limit: u64,
    preflight_cache: Mutex<HashMap<String, PolicyDecision>>,
}

impl GateEnforcer {
    pub fn new(cas: Option<Arc<dyn CasStore>>) -> Self {
        Self {
            cas,
            gas_limit: POLICY_GAS_LIMIT,
            preflight_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_gas_limit(mut self, limit: u64) -> Self {
        self.gas_limit = limit;
        self
    }

    /// Pre-publish gate: structural rules only, no signature or CAS work.
    /// Decisions are cached by (sender, kind, thread, payload-hash).
    pub fn preflight_validate(&self, envelope: &Envelope) -> PolicyDecision {
        let key = format!(
            "{}|{}|{}|{}",
            envelope.sender_pk_b64, envelope.kind, envelope.thread_id, envelope.payload_hash
        );
        {
            let cache = self.preflight_cache.lock().expect("preflight cache poisoned");
            if let Some(hit) = cache.get(&key) {
                debug!(kind = %envelope.kind, "preflight cache hit");
                return hit.clone();
            }
        }

        let mut meter = GasMeter::new(self.gas_limit);
        let mut reasons = Vec::new();
        self.structural_rules(envelope, &mut meter, &mut reasons);
        let decision = self.finish(PolicyGate::Preflight, meter, reasons);

        let mut cache = self.preflight_cache.lock().expect("preflight cache poisoned");
        if cache.len() >= PREFLIGHT_CACHE_CAP {
            // Bounded cache: drop an arbitrary entry rather than grow.
            if let Some(evict) = cache.keys().next().cloned() {
                cache.remove(&evict);
            }
        }
        cache.insert(key, decision.clone());
        decision
    }

    /// On-receive gate: full validation, no cache. This is the
    /// authoritative decision.
    pub async fn ingress_validate(&self, envelope: &Envelope) -> PolicyDecision {
        let mut meter = GasMeter::new(self.gas_limit);
        let mut reasons = Vec::new();
        self.structural_rules(envelope, &mut meter, &mut reasons);
        self.signature_rule(envelope, &mut meter, &mut reasons);
        self.artifact_rule(envelope, &mut meter, &mut reasons).await;
        self.finish(PolicyGate::Ingress, meter, reasons)
    }

    /// Pre-attest gate: everything ingress checks, plus claimed-vs-actual
    /// resource telemetry. Claimed figures in the COMMIT payload are upper
    /// bounds; measurements above any claim fail the gate.
    pub async fn commit_gate_validate(
        &self,
        envelope: &Envelope,
        telemetry: &CommitTelemetry,
    ) -> PolicyDecision {
        let mut meter = GasMeter::new(self.gas_limit);
        let mut reasons = Vec::new();
        self.structural_rules(envelope, &mut meter, &mut reasons);
        self.signature_rule(envelope, &mut meter, &mut reasons);
        self.artifact_rule(envelope, &mut meter, &mut reasons).await;

        if envelope.kind != Verb::Commit {
            meter.charge(GAS_COMPARISON);
            reasons.push(format!("commit gate applied to {}", envelope.kind));
        } else {
            let claims = &envelope.payload["resources"];
            for (field, actual) in [
                ("cpu_time_ms", telemetry.cpu_time_ms),
                ("memory_mb", telemetry.memory_mb),
                ("disk_bytes", telemetry.disk_bytes),
            ] {
                meter.charge(GAS_FIELD_ACCESS + GAS_COMPARISON);
                let claimed = claims[field].as_u64();
                match claimed {
                    Some(claimed) if actual > claimed => reasons.push(format!(
                        "telemetry {field} exceeded claim: {actual} > {claimed}"
                    )),
                    Some(_) => {}
                    None => reasons.push(format!("COMMIT missing resources.{field} claim")),
                }
            }
        }
        self.finish(PolicyGate::CommitGate, meter, reasons)
    }

    // ── Rules ────────────────────────────────────────────────────────────────

    fn structural_rules(
        &self,
        envelope: &Envelope,
        meter: &mut GasMeter,
        reasons: &mut Vec<String>,
    ) {
        // Required fields.
        meter.charge(3 * GAS_FIELD_ACCESS);
        if envelope.thread_id.is_empty() {
            reasons.push("missing thread_id".into());
        }
        if envelope.lamport == 0 {
            reasons.push("lamport must be > 0".into());
        }
        if envelope.sender_pk_b64.is_empty() {
            reasons.push("missing sender_pk_b64".into());
        }

        // Kind allowlist. The wire parse already maps unknown strings to an
        // error, so a typed Verb is always a member; the charge keeps the
        // gas accounting faithful to the rulebook.
        meter.charge(GAS_SET_MEMBERSHIP);

        // Payload size.
        meter.charge(GAS_FIELD_ACCESS + GAS_COMPARISON);
        let size = envelope.payload_size();
        if size > MAX_PAYLOAD_BYTES {
            reasons.push(format!(
                "payload too large: {size} bytes (max {MAX_PAYLOAD_BYTES})"
            ));
        }

        // Policy pin.
        meter.charge(GAS_COMPARISON);
        if envelope.policy_engine_hash != current_policy_hash() {
            reasons.push("policy_engine_hash mismatch".into());
        }

        // COMMIT must at least carry an artifact hash; existence in the CAS
        // is checked by the authoritative gates.
        if envelope.kind == Verb::Commit {
            meter.charge(GAS_FIELD_ACCESS);
            if envelope.payload["artifact_hash"].as_str().is_none() {
                reasons.push("COMMIT requires payload.artifact_hash".into());
            }
        }
    }

    fn signature_rule(
        &self,
        envelope: &Envelope,
        meter: &mut GasMeter,
        reasons: &mut Vec<String>,
    ) {
        meter.charge(GAS_CRYPTO);
        if !verify_envelope(envelope) {
            reasons.push("signature or payload_hash invalid, or lamport <= 0".into());
        }
    }

    async fn artifact_rule(
        &self,
        envelope: &Envelope,
        meter: &mut GasMeter,
        reasons: &mut Vec<String>,
    ) {
        if envelope.kind != Verb::Commit {
            return;
        }
        meter.charge(GAS_SET_MEMBERSHIP);
        let Some(hash) = envelope.payload["artifact_hash"].as_str() else {
            return; // Already reported by the structural rules.
        };
        match &self.cas {
            Some(cas) => {
                if !cas.has(hash).await {
                    reasons.push(format!("artifact_hash not found in CAS: {hash}"));
                }
            }
            None => reasons.push("no CAS configured; COMMIT cannot be validated".into()),
        }
    }

    fn finish(
        &self,
        gate: PolicyGate,
        meter: GasMeter,
        reasons: Vec<String>,
    ) -> PolicyDecision {
        if meter.is_exhausted() {
            return PolicyDecision {
                gate,
                allowed: false,
                reasons: vec!["gas limit exceeded".into()],
                gas_used: meter.used(),
                policy_version: current_policy_hash().to_string(),
            };
        }
        PolicyDecision {
            gate,
            allowed: reasons.is_empty(),
            reasons,
            gas_used: meter.used(),
            policy_version: current_policy_hash().to_string(),
        }
    }
}
