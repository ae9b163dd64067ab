use serde_json::Value;
use sha2::{Digest, Sha256};

/// Canonical JSON bytes: object keys sorted, minimal separators, UTF-8.
///
/// `serde_json::Map` is a BTreeMap here (the `preserve_order` feature is
/// off), so serializing a `Value` already yields sorted keys at every
/// nesting level; compact mode gives the minimal separators.
pub fn canonical_json(value: &Value) -> Vec<u8> {
    serde_json::to_vec(value).unwrap_or_default()
}

/// Lowercase hex SHA-256 of arbitrary bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// SHA-256 of arbitrary bytes as a 32-byte array.
pub fn sha256_bytes(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_are_sorted() {
        let v = json!({"zebra": 1, "apple": {"y": 2, "x": 3}});
        let bytes = canonical_json(&v);
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"apple":{"x":3,"y":2},"zebra":1}"#
        );
    }

    #[test]
    fn same_value_same_bytes() {
        let a = json!({"b": 2, "a": 1});
        let b = json!({"a": 1, "b": 2});
        assert_eq!(canonical_json(&a), canonical_json(&b));
    }

    #[test]
    fn sha256_known_vector() {
        // SHA-256("") from FIPS 180-4.
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
