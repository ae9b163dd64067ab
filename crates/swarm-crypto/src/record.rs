use serde_json::Value;

use crate::canonical::canonical_json;
use crate::keypair::{verify_signature_b64, KeyPair};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;

/// Field names carrying the signature on a signed record. Excluded from the
/// canonical body when verifying.
pub const SIG_FIELDS: [&str; 2] = ["sig_pk_b64", "sig_b64"];

/// Return `record` with `sig_pk_b64` and `sig_b64` attached.
///
/// The signature covers the canonical JSON of the record without the two
/// signature fields. Non-object values are signed as-is (the fields cannot
/// be attached, so the input is returned unchanged).
pub fn sign_record(keypair: &KeyPair, record: &Value) -> Value {
    let Value::Object(map) = record else {
        return record.clone();
    };
    let mut body = map.clone();
    for f in SIG_FIELDS {
        body.remove(f);
    }
    let bytes = canonical_json(&Value::Object(body.clone()));
    let sig = keypair.sign(&bytes);

    body.insert("sig_pk_b64".into(), Value::String(keypair.public_key_b64()));
    body.insert("sig_b64".into(), Value::String(B64.encode(sig)));
    Value::Object(body)
}

/// Verify the signature on a signed record: rebuild the body without the
/// signature fields, canonicalize, and check the Ed25519 signature.
pub fn verify_record(signed: &Value) -> bool {
    let Value::Object(map) = signed else {
        return false;
    };
    let (Some(Value::String(pk)), Some(Value::String(sig))) =
        (map.get("sig_pk_b64"), map.get("sig_b64"))
    else {
        return false;
    };
    let mut body = map.clone();
    for f in SIG_FIELDS {
        body.remove(f);
    }
    let bytes = canonical_json(&Value::Object(body));
    verify_signature_b64(pk, &bytes, sig)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn signed_record_verifies() {
        let kp = KeyPair::generate();
        let signed = sign_record(&kp, &json!({"kind": "NEED", "lamport": 1}));
        assert!(verify_record(&signed));
    }

    #[test]
    fn tampered_record_fails() {
        let kp = KeyPair::generate();
        let mut signed = sign_record(&kp, &json!({"kind": "NEED", "lamport": 1}));
        signed["lamport"] = json!(2);
        assert!(!verify_record(&signed));
    }

    #[test]
    fn missing_sig_fields_fail() {
        assert!(!verify_record(&json!({"kind": "NEED"})));
        assert!(!verify_record(&json!("not an object")));
    }

    #[test]
    fn re_signing_replaces_old_signature() {
        let kp1 = KeyPair::generate();
        let kp2 = KeyPair::generate();
        let once = sign_record(&kp1, &json!({"n": 1}));
        let twice = sign_record(&kp2, &once);
        assert!(verify_record(&twice));
        assert_eq!(twice["sig_pk_b64"], json!(kp2.public_key_b64()));
    }
}
