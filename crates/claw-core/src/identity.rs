// SPDX-License-Identifier: MIT OR Apache-2.0
//! Identity-key newtype.
//!
//! A node is identified by the 66-character lowercase hex encoding of its
//! 33-byte compressed secp256k1 public key. Every signed artifact carries
//! the signer's identity key in this form.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;

/// A 33-byte compressed public key, hex encoded (66 chars, leading 02/03).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct IdentityKey(String);

impl IdentityKey {
    /// Parse and validate an identity key from its hex form.
    ///
    /// Lowercases the input; checks length, hex alphabet, and the
    /// compressed-point leading byte (`02` or `03`).
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidIdentity`] describing the first
    /// structural problem found.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        let s = s.trim().to_ascii_lowercase();
        if s.len() != 66 {
            return Err(CoreError::InvalidIdentity {
                reason: format!("expected 66 hex chars, got {}", s.len()),
            });
        }
        if !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(CoreError::InvalidIdentity {
                reason: "non-hex characters".into(),
            });
        }
        if !(s.starts_with("02") || s.starts_with("03")) {
            return Err(CoreError::InvalidIdentity {
                reason: "not a compressed point (leading byte must be 02 or 03)".into(),
            });
        }
        Ok(Self(s))
    }

    /// The full hex form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The raw 33 key bytes.
    ///
    /// Infallible for keys constructed through [`IdentityKey::parse`].
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        hex::decode(&self.0).unwrap_or_default()
    }

    /// Shortened display form for health output and logs: first ten hex
    /// chars plus an ellipsis.
    #[must_use]
    pub fn truncated(&self) -> String {
        format!("{}…", &self.0[..10])
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for IdentityKey {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";

    #[test]
    fn parses_valid_key() {
        let k = IdentityKey::parse(VALID).unwrap();
        assert_eq!(k.as_str(), VALID);
        assert_eq!(k.to_bytes().len(), 33);
    }

    #[test]
    fn uppercase_input_is_lowered() {
        let k = IdentityKey::parse(&VALID.to_ascii_uppercase()).unwrap();
        assert_eq!(k.as_str(), VALID);
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(IdentityKey::parse("02abcd").is_err());
    }

    #[test]
    fn rejects_non_hex() {
        let bad = format!("02{}", "zz".repeat(32));
        assert!(IdentityKey::parse(&bad).is_err());
    }

    #[test]
    fn rejects_uncompressed_prefix() {
        let bad = format!("04{}", "ab".repeat(32));
        assert!(IdentityKey::parse(&bad).is_err());
    }

    #[test]
    fn truncated_form() {
        let k = IdentityKey::parse(VALID).unwrap();
        assert_eq!(k.truncated(), "0279be667e…");
    }

    #[test]
    fn serde_is_transparent() {
        let k = IdentityKey::parse(VALID).unwrap();
        assert_eq!(
            serde_json::to_string(&k).unwrap(),
            format!("\"{VALID}\"")
        );
    }
}
