// SPDX-License-Identifier: MIT OR Apache-2.0
//! HTTP error envelope.
//!
//! Structural and security failures surface their stable code and a 4xx
//! status; internal failures collapse to a sanitized 500. Signature
//! failures are always 403, never 500.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use claw_core::ErrorCode;
use serde_json::json;

/// A client-visible API failure.
#[derive(Debug)]
pub struct ApiError {
    /// HTTP status.
    pub status: StatusCode,
    /// Stable code tag, when the failure has one.
    pub code: Option<ErrorCode>,
    /// Human-readable message.
    pub message: String,
}

impl ApiError {
    /// A coded failure; the status comes from the code's mapping.
    pub fn coded(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::from_u16(code.http_status())
                .unwrap_or(StatusCode::BAD_REQUEST),
            code: Some(code),
            message: message.into(),
        }
    }

    /// An uncoded failure with an explicit status.
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            code: None,
            message: message.into(),
        }
    }

    /// A sanitized internal failure.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match self.code {
            Some(code) => json!({"error": {"code": code, "message": self.message}}),
            None => json!({"error": {"message": self.message}}),
        };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coded_errors_use_the_taxonomy_status() {
        let err = ApiError::coded(ErrorCode::PaymentReplay, "tx seen");
        assert_eq!(err.status, StatusCode::PAYMENT_REQUIRED);
        let err = ApiError::coded(ErrorCode::InvalidSignature, "bad sig");
        assert_eq!(err.status, StatusCode::FORBIDDEN);
        let err = ApiError::coded(ErrorCode::RateLimited, "slow down");
        assert_eq!(err.status, StatusCode::TOO_MANY_REQUESTS);
    }
}
