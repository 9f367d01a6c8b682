//! Content hashing over canonical byte sequences.
//!
//! Multi-field values are encoded field by field: a presence tag byte (`0` for null, `1` for
//! present) and, when present, an 8-byte big-endian length followed by the raw bytes. No two
//! distinct field sequences share an encoding, so moving bytes across a field boundary always
//! changes the digest.

use sha2::{Digest, Sha256};

/// Name recorded in package manifests.
pub const HASH_ALGO: &str = "SHA-256";

/// SHA-256 of `bytes`, lowercase hex.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Incremental canonical encoder feeding a SHA-256 state.
#[derive(Clone, Default)]
pub struct CanonicalHasher {
    hasher: Sha256,
}

impl CanonicalHasher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a present field.
    pub fn field(mut self, bytes: impl AsRef<[u8]>) -> Self {
        let bytes = bytes.as_ref();
        self.hasher.update([1u8]);
        self.hasher.update((bytes.len() as u64).to_be_bytes());
        self.hasher.update(bytes);
        self
    }

    /// Append a nullable field.
    pub fn optional(mut self, bytes: Option<impl AsRef<[u8]>>) -> Self {
        match bytes {
            Some(b) => self.field(b),
            None => {
                self.hasher.update([0u8]);
                self
            }
        }
    }

    /// Append a JSON value with sorted object keys.
    pub fn json(self, value: &serde_json::Value) -> Self {
        let mut encoded = Vec::new();
        write_canonical_json(value, &mut encoded);
        self.field(encoded)
    }

    /// Finish and return the lowercase hex digest.
    pub fn finish_hex(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

/// Compact JSON with object keys sorted at every depth.
pub fn write_canonical_json(value: &serde_json::Value, out: &mut Vec<u8>) {
    use serde_json::Value;

    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push(b'{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical_json(&Value::String(key.clone()), out);
                out.push(b':');
                write_canonical_json(&map[key], out);
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical_json(item, out);
            }
            out.push(b']');
        }
        // Scalars have a single compact rendering.
        scalar => out.extend_from_slice(scalar.to_string().as_bytes()),
    }
}

/// Constant-time comparison of two hex digests.
pub fn digests_equal(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sha256_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_field_boundaries_are_unambiguous() {
        let a = CanonicalHasher::new().field("ab").field("c").finish_hex();
        let b = CanonicalHasher::new().field("a").field("bc").finish_hex();
        assert_ne!(a, b);
    }

    #[test]
    fn test_null_differs_from_empty() {
        let null = CanonicalHasher::new().optional(None::<&str>).finish_hex();
        let empty = CanonicalHasher::new().optional(Some("")).finish_hex();
        assert_ne!(null, empty);
    }

    #[test]
    fn test_json_key_order_is_irrelevant() {
        let a: serde_json::Value = serde_json::from_str(r#"{"b":1,"a":2}"#).unwrap();
        let b = json!({"a": 2, "b": 1});
        assert_eq!(
            CanonicalHasher::new().json(&a).finish_hex(),
            CanonicalHasher::new().json(&b).finish_hex()
        );
    }

    #[test]
    fn test_digests_equal() {
        assert!(digests_equal("abcd", "abcd"));
        assert!(!digests_equal("abcd", "abce"));
        assert!(!digests_equal("abcd", "abc"));
    }
}
