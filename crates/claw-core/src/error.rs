// SPDX-License-Identifier: MIT OR Apache-2.0
//! Client-visible error taxonomy with stable error codes.
//!
//! Every failure a remote caller can observe carries an [`ErrorCode`] (a
//! machine-readable, stable string tag) plus a human-readable message.
//! Codes map deterministically onto HTTP status classes: payment failures
//! are always `402` (retryable with a fresh payment), signature failures
//! are always `403` (never `500`), structural failures are `400`.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code.
///
/// Each variant serialises to a `SCREAMING_SNAKE_CASE` string that is
/// guaranteed not to change across patch releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // -- Dispatch --
    /// The requested capability is not registered on this node.
    UnknownCapability,
    /// No payment was attached and no free trial is available.
    PaymentRequired,
    /// The payment transaction hash was already consumed.
    PaymentReplay,
    /// The wallet rejected the payment during internalization.
    PaymentInvalid,
    /// The accepted amount is below the capability price.
    Underpayment,
    /// The transaction lacks the required protocol fee output.
    MissingFee,
    /// The `x-bsv-payment` header is missing fields or not valid JSON.
    MalformedPayment,

    // -- Protocol --
    /// The per-sender rate limit was exhausted.
    RateLimited,
    /// Signature verification failed.
    InvalidSignature,
    /// The supplied endpoint URL is not a public http(s) address.
    InvalidEndpoint,
    /// The invitation expiry timestamp is in the past.
    InvitationExpired,
    /// The invitation nonce was seen before inside the replay window.
    NonceReplay,

    // -- Admin --
    /// Missing or wrong bearer credentials for an admin route.
    Unauthorized,
}

impl ErrorCode {
    /// The HTTP status this code is surfaced with.
    ///
    /// Replay and fee failures are `402` so the caller knows a fresh payment
    /// can succeed; signature failures are always `403` and never `500`.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::UnknownCapability => 404,
            Self::PaymentRequired
            | Self::PaymentReplay
            | Self::PaymentInvalid
            | Self::Underpayment
            | Self::MissingFee => 402,
            Self::MalformedPayment
            | Self::InvalidEndpoint
            | Self::InvitationExpired
            | Self::NonceReplay => 400,
            Self::RateLimited => 429,
            Self::InvalidSignature => 403,
            Self::Unauthorized => 401,
        }
    }

    /// The stable wire tag for this code.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownCapability => "UNKNOWN_CAPABILITY",
            Self::PaymentRequired => "PAYMENT_REQUIRED",
            Self::PaymentReplay => "PAYMENT_REPLAY",
            Self::PaymentInvalid => "PAYMENT_INVALID",
            Self::Underpayment => "UNDERPAYMENT",
            Self::MissingFee => "MISSING_FEE",
            Self::MalformedPayment => "MALFORMED_PAYMENT",
            Self::RateLimited => "RATE_LIMITED",
            Self::InvalidSignature => "INVALID_SIGNATURE",
            Self::InvalidEndpoint => "INVALID_ENDPOINT",
            Self::InvitationExpired => "INVITATION_EXPIRED",
            Self::NonceReplay => "NONCE_REPLAY",
            Self::Unauthorized => "UNAUTHORIZED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ClawError
// ---------------------------------------------------------------------------

/// A coded error together with a human-readable message.
///
/// Displays as `[CODE] message`, which is the form that reaches remote
/// callers in JSON error bodies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClawError {
    /// Stable machine-readable code.
    pub code: ErrorCode,
    /// Human-readable detail. Sanitized before leaving the process.
    pub message: String,
}

impl ClawError {
    /// Construct a new coded error.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for ClawError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ClawError {}

// ---------------------------------------------------------------------------
// CoreError
// ---------------------------------------------------------------------------

/// Internal errors raised by contract-level helpers.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Serialization failed while canonicalizing a value.
    #[error("canonical serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    /// An identity key failed structural validation.
    #[error("invalid identity key: {reason}")]
    InvalidIdentity {
        /// What was wrong with the key.
        reason: String,
    },

    /// An endpoint URL failed public-address validation.
    #[error("invalid endpoint: {reason}")]
    InvalidEndpoint {
        /// What was wrong with the URL.
        reason: String,
    },

    /// The embedded fee-key digest does not match the fee key.
    #[error("fee identity key digest mismatch: expected {expected}, computed {computed}")]
    FeeConstantMismatch {
        /// Digest embedded at build time.
        expected: String,
        /// Digest recomputed at startup.
        computed: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    /// All error codes for exhaustive iteration in tests.
    const ALL_CODES: &[ErrorCode] = &[
        ErrorCode::UnknownCapability,
        ErrorCode::PaymentRequired,
        ErrorCode::PaymentReplay,
        ErrorCode::PaymentInvalid,
        ErrorCode::Underpayment,
        ErrorCode::MissingFee,
        ErrorCode::MalformedPayment,
        ErrorCode::RateLimited,
        ErrorCode::InvalidSignature,
        ErrorCode::InvalidEndpoint,
        ErrorCode::InvitationExpired,
        ErrorCode::NonceReplay,
        ErrorCode::Unauthorized,
    ];

    #[test]
    fn display_form() {
        let err = ClawError::new(ErrorCode::PaymentReplay, "tx hash already consumed");
        assert_eq!(err.to_string(), "[PAYMENT_REPLAY] tx hash already consumed");
    }

    #[test]
    fn serde_tags_are_screaming_snake_case() {
        for code in ALL_CODES {
            let json = serde_json::to_string(code).unwrap();
            assert_eq!(json, format!("\"{}\"", code.as_str()));
            let back: ErrorCode = serde_json::from_str(&json).unwrap();
            assert_eq!(back, *code);
        }
    }

    #[test]
    fn payment_family_is_402() {
        for code in [
            ErrorCode::PaymentRequired,
            ErrorCode::PaymentReplay,
            ErrorCode::PaymentInvalid,
            ErrorCode::Underpayment,
            ErrorCode::MissingFee,
        ] {
            assert_eq!(code.http_status(), 402);
        }
    }

    #[test]
    fn signature_failures_are_403_never_500() {
        assert_eq!(ErrorCode::InvalidSignature.http_status(), 403);
        for code in ALL_CODES {
            assert!(code.http_status() < 500);
        }
    }

    #[test]
    fn structural_failures_are_400() {
        for code in [
            ErrorCode::MalformedPayment,
            ErrorCode::InvalidEndpoint,
            ErrorCode::InvitationExpired,
            ErrorCode::NonceReplay,
        ] {
            assert_eq!(code.http_status(), 400);
        }
    }

    #[test]
    fn rate_limit_is_429() {
        assert_eq!(ErrorCode::RateLimited.http_status(), 429);
    }
}
