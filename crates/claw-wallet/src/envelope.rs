// SPDX-License-Identifier: MIT OR Apache-2.0
//! Defensive transaction-envelope parsing and the fee-output check.
//!
//! The dispatcher runs a structural check over the raw payment bytes to
//! confirm a protocol-fee output exists. This check is defense-in-depth
//! only: the authoritative gate is the wallet's internalize response.
//! Parse failures therefore split into *definitive* layouts (fee output
//! demonstrably absent) and *indeterminate* ones (truncation, BEEF or
//! other unknown envelope) — the latter log a warning and never block.

use std::fmt;

/// One parsed transaction output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutput {
    /// Output value in satoshis.
    pub satoshis: u64,
    /// Locking script bytes.
    pub script: Vec<u8>,
}

/// Parsed layout of a standard transaction body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxLayout {
    /// Transaction version.
    pub version: u32,
    /// Number of inputs.
    pub input_count: u64,
    /// Outputs in order.
    pub outputs: Vec<TxOutput>,
}

/// Why a buffer could not be parsed as a standard transaction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TxParseError {
    /// The buffer ends before the layout is complete.
    #[error("transaction truncated at byte {offset}")]
    Truncated {
        /// Offset at which the read ran out of bytes.
        offset: usize,
    },

    /// A varint used the reserved 0xff..  encodings incorrectly.
    #[error("invalid varint at byte {offset}")]
    BadVarint {
        /// Offset of the offending varint.
        offset: usize,
    },

    /// The buffer carries a BEEF / Atomic-BEEF envelope (magic `0xBE 0xEF`
    /// at offset 2–3). Ancestry-proof envelopes are not unwrapped here;
    /// the wallet driver already validated the payment inside.
    #[error("BEEF envelope detected; structural check abstains")]
    BeefEnvelope,

    /// Trailing garbage or an impossible field count.
    #[error("implausible transaction layout: {0}")]
    Implausible(String),
}

impl TxParseError {
    /// Whether this failure is *uncertainty* rather than evidence of a
    /// malformed payment. Indeterminate failures must not block a call.
    #[must_use]
    pub fn is_indeterminate(&self) -> bool {
        matches!(self, Self::Truncated { .. } | Self::BeefEnvelope)
    }
}

/// Result of the structural fee-output check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeCheck {
    /// An output beyond index 0 carries at least the fee amount.
    Present,
    /// The layout parsed fully and no qualifying output exists.
    Missing,
    /// The envelope could not be judged; callers warn and do not block.
    Indeterminate,
}

impl fmt::Display for FeeCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Present => "present",
            Self::Missing => "missing",
            Self::Indeterminate => "indeterminate",
        };
        f.write_str(s)
    }
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], TxParseError> {
        let end = self
            .pos
            .checked_add(n)
            .ok_or(TxParseError::Truncated { offset: self.pos })?;
        if end > self.buf.len() {
            return Err(TxParseError::Truncated { offset: self.pos });
        }
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u32_le(&mut self) -> Result<u32, TxParseError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64_le(&mut self) -> Result<u64, TxParseError> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn varint(&mut self) -> Result<u64, TxParseError> {
        let offset = self.pos;
        let tag = self.take(1)?[0];
        match tag {
            0xfd => {
                let b = self.take(2)?;
                let v = u64::from(u16::from_le_bytes([b[0], b[1]]));
                if v < 0xfd {
                    return Err(TxParseError::BadVarint { offset });
                }
                Ok(v)
            }
            0xfe => {
                let b = self.take(4)?;
                let v = u64::from(u32::from_le_bytes([b[0], b[1], b[2], b[3]]));
                if v <= u64::from(u16::MAX) {
                    return Err(TxParseError::BadVarint { offset });
                }
                Ok(v)
            }
            0xff => {
                let b = self.take(8)?;
                let v = u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]);
                if v <= u64::from(u32::MAX) {
                    return Err(TxParseError::BadVarint { offset });
                }
                Ok(v)
            }
            n => Ok(u64::from(n)),
        }
    }
}

/// Sanity ceiling for declared input/output counts. A count above this in
/// a sub-megabyte payment buffer is garbage, not a transaction.
const MAX_FIELD_COUNT: u64 = 100_000;

/// Parse `bytes` as a standard transaction body.
///
/// A BEEF / Atomic-BEEF envelope (magic `0xBE 0xEF` at offset 2–3) is
/// detected and reported as [`TxParseError::BeefEnvelope`] rather than
/// unwrapped.
///
/// # Errors
///
/// Any [`TxParseError`]; use [`TxParseError::is_indeterminate`] to decide
/// whether the failure may block a payment.
pub fn parse_tx_envelope(bytes: &[u8]) -> Result<TxLayout, TxParseError> {
    if bytes.len() >= 4 && bytes[2] == 0xbe && bytes[3] == 0xef {
        return Err(TxParseError::BeefEnvelope);
    }

    let mut cur = Cursor::new(bytes);
    let version = cur.u32_le()?;

    let input_count = cur.varint()?;
    if input_count == 0 || input_count > MAX_FIELD_COUNT {
        return Err(TxParseError::Implausible(format!(
            "input count {input_count}"
        )));
    }
    for _ in 0..input_count {
        cur.take(32)?; // prev txid
        cur.take(4)?; // prev vout
        let script_len = cur.varint()?;
        cur.take(usize::try_from(script_len).map_err(|_| TxParseError::Implausible(
            format!("unlocking script length {script_len}"),
        ))?)?;
        cur.take(4)?; // sequence
    }

    let output_count = cur.varint()?;
    if output_count == 0 || output_count > MAX_FIELD_COUNT {
        return Err(TxParseError::Implausible(format!(
            "output count {output_count}"
        )));
    }
    let mut outputs = Vec::with_capacity(output_count as usize);
    for _ in 0..output_count {
        let satoshis = cur.u64_le()?;
        let script_len = cur.varint()?;
        let script = cur
            .take(usize::try_from(script_len).map_err(|_| TxParseError::Implausible(
                format!("locking script length {script_len}"),
            ))?)?
            .to_vec();
        outputs.push(TxOutput { satoshis, script });
    }

    cur.take(4)?; // locktime

    Ok(TxLayout {
        version,
        input_count,
        outputs,
    })
}

/// Structural protocol-fee check over a raw payment buffer.
///
/// Requires at least two outputs and at least one output at index > 0
/// whose value is ≥ `fee_sats`.
#[must_use]
pub fn fee_output_check(bytes: &[u8], fee_sats: u64) -> FeeCheck {
    match parse_tx_envelope(bytes) {
        Ok(layout) => {
            if layout.outputs.len() >= 2
                && layout.outputs[1..].iter().any(|o| o.satoshis >= fee_sats)
            {
                FeeCheck::Present
            } else {
                FeeCheck::Missing
            }
        }
        Err(e) if e.is_indeterminate() => FeeCheck::Indeterminate,
        Err(_) => FeeCheck::Missing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_varint(buf: &mut Vec<u8>, v: u64) {
        if v < 0xfd {
            buf.push(v as u8);
        } else if v <= u64::from(u16::MAX) {
            buf.push(0xfd);
            buf.extend_from_slice(&(v as u16).to_le_bytes());
        } else if v <= u64::from(u32::MAX) {
            buf.push(0xfe);
            buf.extend_from_slice(&(v as u32).to_le_bytes());
        } else {
            buf.push(0xff);
            buf.extend_from_slice(&v.to_le_bytes());
        }
    }

    /// Assemble a minimal valid raw tx with the given output values.
    fn raw_tx(outputs: &[(u64, usize)]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&1u32.to_le_bytes()); // version
        push_varint(&mut buf, 1); // one input
        buf.extend_from_slice(&[0u8; 32]); // prev txid
        buf.extend_from_slice(&0xffff_ffffu32.to_le_bytes()); // vout
        push_varint(&mut buf, 0); // empty unlocking script
        buf.extend_from_slice(&0xffff_ffffu32.to_le_bytes()); // sequence
        push_varint(&mut buf, outputs.len() as u64);
        for (sats, script_len) in outputs {
            buf.extend_from_slice(&sats.to_le_bytes());
            push_varint(&mut buf, *script_len as u64);
            buf.extend_from_slice(&vec![0xac; *script_len]);
        }
        buf.extend_from_slice(&0u32.to_le_bytes()); // locktime
        buf
    }

    #[test]
    fn parses_two_output_tx() {
        let tx = raw_tx(&[(10, 35), (2, 35)]);
        let layout = parse_tx_envelope(&tx).unwrap();
        assert_eq!(layout.version, 1);
        assert_eq!(layout.input_count, 1);
        assert_eq!(layout.outputs.len(), 2);
        assert_eq!(layout.outputs[0].satoshis, 10);
        assert_eq!(layout.outputs[1].satoshis, 2);
        assert_eq!(layout.outputs[1].script.len(), 35);
    }

    #[test]
    fn fee_present_when_second_output_covers_fee() {
        let tx = raw_tx(&[(10, 35), (2, 35)]);
        assert_eq!(fee_output_check(&tx, 2), FeeCheck::Present);
    }

    #[test]
    fn fee_missing_with_single_output() {
        let tx = raw_tx(&[(12, 35)]);
        assert_eq!(fee_output_check(&tx, 2), FeeCheck::Missing);
    }

    #[test]
    fn fee_missing_when_later_outputs_underpay() {
        let tx = raw_tx(&[(10, 35), (1, 35)]);
        assert_eq!(fee_output_check(&tx, 2), FeeCheck::Missing);
    }

    #[test]
    fn fee_output_at_index_zero_does_not_count() {
        // The provider output sits at index 0; a fee-sized value there
        // must not satisfy the check.
        let tx = raw_tx(&[(2, 35), (1, 35)]);
        assert_eq!(fee_output_check(&tx, 2), FeeCheck::Missing);
    }

    #[test]
    fn truncated_buffer_is_indeterminate() {
        let mut tx = raw_tx(&[(10, 35), (2, 35)]);
        tx.truncate(tx.len() - 20);
        let err = parse_tx_envelope(&tx).unwrap_err();
        assert!(err.is_indeterminate());
        assert_eq!(fee_output_check(&tx, 2), FeeCheck::Indeterminate);
    }

    #[test]
    fn beef_magic_is_indeterminate() {
        // BRC-62 BEEF version bytes on the wire: 01 00 be ef.
        let mut beef = vec![0x01, 0x00, 0xbe, 0xef];
        beef.extend_from_slice(&[0u8; 64]);
        assert_eq!(parse_tx_envelope(&beef).unwrap_err(), TxParseError::BeefEnvelope);
        assert_eq!(fee_output_check(&beef, 2), FeeCheck::Indeterminate);
    }

    #[test]
    fn garbage_counts_are_implausible() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&1u32.to_le_bytes());
        push_varint(&mut buf, 0); // zero inputs
        let err = parse_tx_envelope(&buf).unwrap_err();
        assert!(matches!(err, TxParseError::Implausible(_)));
        assert!(!err.is_indeterminate());
    }

    #[test]
    fn non_minimal_varint_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.push(0xfd); // 16-bit varint encoding of 1: non-minimal
        buf.extend_from_slice(&1u16.to_le_bytes());
        let err = parse_tx_envelope(&buf).unwrap_err();
        assert!(matches!(err, TxParseError::BadVarint { .. }));
    }
}
