// SPDX-License-Identifier: MIT OR Apache-2.0
//! Canonical JSON serialization and hashing.
//!
//! Every signature in the system is computed over the canonical JSON of the
//! artifact with its `signature` field removed. Canonical means: object keys
//! sorted lexicographically at every depth, no whitespace. Two nodes that
//! disagree on a single byte here cannot verify each other's receipts, so
//! all signing and verification paths must go through this module.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::CoreError;

/// Produce the deterministic JSON string for signing and hashing.
///
/// This is not a full JCS implementation, but it is stable for our types:
/// - keys are sorted (serde_json's `Map` is a `BTreeMap` by default)
/// - numbers are serialized consistently by serde_json
///
/// Round-tripping through [`serde_json::Value`] discards any insertion
/// order the caller's struct had.
///
/// # Errors
///
/// Returns [`CoreError::Json`] if the value cannot be serialized.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, CoreError> {
    let v = serde_json::to_value(value)?;
    Ok(serde_json::to_string(&v)?)
}

/// Compute the hex-encoded SHA-256 digest of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Hex SHA-256 of the canonical JSON of `value`.
///
/// # Errors
///
/// Returns [`CoreError::Json`] if the value cannot be serialized.
pub fn canonical_sha256<T: Serialize>(value: &T) -> Result<String, CoreError> {
    Ok(sha256_hex(canonical_json(value)?.as_bytes()))
}

/// Canonical JSON of `value` with its top-level `signature` field removed.
///
/// This is the exact byte string that gets signed and verified for every
/// signed artifact (invitations, announcements, receipts). The field is
/// *removed*, not nulled — a verifier reconstructing the string from a
/// received artifact must see the identical bytes.
///
/// # Errors
///
/// Returns [`CoreError::Json`] if the value cannot be serialized.
pub fn canonical_for_signing<T: Serialize>(value: &T) -> Result<String, CoreError> {
    let mut v = serde_json::to_value(value)?;
    if let Value::Object(map) = &mut v {
        map.remove("signature");
    }
    Ok(serde_json::to_string(&v)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_sort_at_every_depth() {
        let a = json!({"b": {"z": 1, "a": 2}, "a": [{"y": 1, "x": 2}]});
        let s = canonical_json(&a).unwrap();
        assert_eq!(s, r#"{"a":[{"x":2,"y":1}],"b":{"a":2,"z":1}}"#);
    }

    #[test]
    fn insertion_order_is_irrelevant() {
        #[derive(Serialize)]
        struct Forward {
            alpha: u32,
            beta: u32,
        }
        #[derive(Serialize)]
        struct Backward {
            beta: u32,
            alpha: u32,
        }
        let f = canonical_json(&Forward { alpha: 1, beta: 2 }).unwrap();
        let b = canonical_json(&Backward { beta: 2, alpha: 1 }).unwrap();
        assert_eq!(f, b);
    }

    #[test]
    fn signing_view_removes_signature() {
        let v = json!({"signature": "abc", "nonce": "n1"});
        let s = canonical_for_signing(&v).unwrap();
        assert_eq!(s, r#"{"nonce":"n1"}"#);
    }

    #[test]
    fn signing_view_is_stable_without_signature() {
        let v = json!({"nonce": "n1"});
        assert_eq!(canonical_for_signing(&v).unwrap(), r#"{"nonce":"n1"}"#);
    }

    #[test]
    fn sha256_hex_known_vector() {
        // sha256("abc")
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn canonical_hash_is_deterministic() {
        let v = json!({"k": [1, 2, 3], "m": {"a": true}});
        assert_eq!(
            canonical_sha256(&v).unwrap(),
            canonical_sha256(&v).unwrap()
        );
    }
}
