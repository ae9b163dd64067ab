use once_cell::sync::Lazy;
use serde_json::json;

use swarm_core::constants::MAX_PAYLOAD_BYTES;
use swarm_core::Verb;
use swarm_crypto::{canonical_json, sha256_hex};

/// The rulebook, as data. Hashing the canonical encoding pins the policy
/// version: any rule change yields a new `policy_engine_hash` and envelopes
/// built against the old rules are rejected.
fn policy_spec() -> serde_json::Value {
    json!({
        "version": 1,
        "hash_algo": "sha256",
        "allowed_kinds": Verb::ALL.iter().map(|v| v.as_str()).collect::<Vec<_>>(),
        "max_payload_bytes": MAX_PAYLOAD_BYTES,
        "require_artifact_for_commit": true,
        "required_fields": ["thread_id", "lamport", "sender_pk_b64"],
    })
}

static POLICY_HASH: Lazy<String> = Lazy::new(|| sha256_hex(&canonical_json(&policy_spec())));

/// Stable 64-hex hash of the active rule set.
pub fn current_policy_hash() -> &'static str {
    &POLICY_HASH
}
