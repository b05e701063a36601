// SPDX-License-Identifier: MIT OR Apache-2.0
//! `OP_RETURN` beacon script construction.
//!
//! A beacon is an on-chain advertisement of a node: `OP_FALSE OP_RETURN`,
//! a push of the tag `CLAWSATS_V1`, and a push of a compact JSON payload.
//! The payload serializes its fields in fixed declaration order (not
//! lexicographic) so existing indexers keep matching byte patterns.

use claw_core::BEACON_TAG;
use serde::{Deserialize, Serialize};

/// Maximum combined size of the tag push and payload push data.
pub const BEACON_MAX_BYTES: usize = 220;

const OP_FALSE: u8 = 0x00;
const OP_RETURN: u8 = 0x6a;
const OP_PUSHDATA1: u8 = 0x4c;
const OP_PUSHDATA2: u8 = 0x4d;

/// Beacon payload with its fixed field order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BeaconPayload {
    /// Protocol version.
    pub v: String,
    /// Claw identifier.
    pub id: String,
    /// Public endpoint.
    pub ep: String,
    /// Chain tag.
    pub ch: String,
    /// Capability names.
    pub cap: Vec<String>,
    /// Unix seconds.
    pub ts: u64,
    /// Base64 signature.
    pub sig: String,
}

/// Errors from beacon construction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BeaconError {
    /// Tag plus payload exceed [`BEACON_MAX_BYTES`].
    #[error("beacon payload too large: {size} bytes (max {max})")]
    TooLarge {
        /// Combined tag and payload size.
        size: usize,
        /// The allowed maximum.
        max: usize,
    },

    /// A push exceeded the 16-bit pushdata range.
    #[error("push of {0} bytes exceeds pushdata range")]
    PushTooLarge(usize),

    /// The payload could not be serialized.
    #[error("payload serialization failed: {0}")]
    Serialize(String),
}

fn push_data(script: &mut Vec<u8>, data: &[u8]) -> Result<(), BeaconError> {
    match data.len() {
        n if n <= 75 => {
            script.push(n as u8);
        }
        n if n <= 255 => {
            script.push(OP_PUSHDATA1);
            script.push(n as u8);
        }
        n if n <= 65535 => {
            script.push(OP_PUSHDATA2);
            script.extend_from_slice(&(n as u16).to_le_bytes());
        }
        n => return Err(BeaconError::PushTooLarge(n)),
    }
    script.extend_from_slice(data);
    Ok(())
}

/// Build the beacon locking script for `payload`.
///
/// # Errors
///
/// [`BeaconError::TooLarge`] when tag + payload exceed 220 bytes, or a
/// serialization failure.
pub fn build_beacon_script(payload: &BeaconPayload) -> Result<Vec<u8>, BeaconError> {
    // Fixed field order: serialize the struct directly, not through the
    // canonical (sorted) JSON path.
    let body =
        serde_json::to_vec(payload).map_err(|e| BeaconError::Serialize(e.to_string()))?;

    let total = BEACON_TAG.len() + body.len();
    if total > BEACON_MAX_BYTES {
        return Err(BeaconError::TooLarge {
            size: total,
            max: BEACON_MAX_BYTES,
        });
    }

    let mut script = vec![OP_FALSE, OP_RETURN];
    push_data(&mut script, BEACON_TAG.as_bytes())?;
    push_data(&mut script, &body)?;
    Ok(script)
}
