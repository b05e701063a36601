// SPDX-License-Identifier: MIT OR Apache-2.0
//! Middleware stack for the node HTTP API.

use axum::{
    extract::{Request, State},
    http::{HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use crate::state::AppState;

// ---------------------------------------------------------------------------
// Access tracing
// ---------------------------------------------------------------------------

/// Which part of the node surface a request hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Surface {
    /// Paid capability dispatch under `/call/`.
    Call,
    /// Peer-facing protocol routes: discovery, invitations, announcements,
    /// direct payment submission, liveness.
    Peer,
    /// The bearer-gated operator surface (JSON-RPC and anything else).
    Admin,
}

impl Surface {
    fn as_str(self) -> &'static str {
        match self {
            Self::Call => "call",
            Self::Peer => "peer",
            Self::Admin => "admin",
        }
    }
}

/// Classify a request path onto the node surface it belongs to.
#[must_use]
pub fn classify(path: &str) -> Surface {
    if path.starts_with("/call/") {
        return Surface::Call;
    }
    if is_public(path) {
        return Surface::Peer;
    }
    Surface::Admin
}

/// Per-request trace record, available as an Axum extension and echoed in
/// the `x-claw-trace` response header so a hiring claw can quote it when
/// disputing a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccessTrace {
    /// Random per-request tag, 16 hex chars.
    pub id: u64,
    /// Surface the request hit.
    pub surface: Surface,
}

/// Access-trace middleware: tags the request, classifies its surface, and
/// logs the outcome.
///
/// 402 responses are ordinary protocol flow (every unpaid call earns one
/// challenge), so they log at debug; other outcomes log at info, server
/// faults at warn.
pub async fn trace_requests(mut req: Request, next: Next) -> Response {
    let trace = AccessTrace {
        id: rand::random(),
        surface: classify(req.uri().path()),
    };
    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let capability = path
        .strip_prefix("/call/")
        .map(str::to_string)
        .unwrap_or_default();
    req.extensions_mut().insert(trace);

    let started = Instant::now();
    let mut response = next.run(req).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;
    let status = response.status();

    let trace_tag = format!("{:016x}", trace.id);
    match status {
        StatusCode::PAYMENT_REQUIRED => debug!(
            trace = %trace_tag,
            surface = trace.surface.as_str(),
            capability = %capability,
            http.method = %method,
            http.path = %path,
            elapsed_ms,
            "payment challenge issued"
        ),
        s if s.is_server_error() => warn!(
            trace = %trace_tag,
            surface = trace.surface.as_str(),
            http.method = %method,
            http.path = %path,
            http.status = s.as_u16(),
            elapsed_ms,
            "request faulted"
        ),
        s => info!(
            trace = %trace_tag,
            surface = trace.surface.as_str(),
            http.method = %method,
            http.path = %path,
            http.status = s.as_u16(),
            elapsed_ms,
            "request served"
        ),
    }

    if let Ok(value) = HeaderValue::from_str(&trace_tag) {
        response.headers_mut().insert("x-claw-trace", value);
    }
    response
}

// ---------------------------------------------------------------------------
// Bearer auth
// ---------------------------------------------------------------------------

/// Paths exempt from bearer auth. Everything else is the admin surface.
pub const PUBLIC_PATHS: &[&str] = &[
    "/health",
    "/discovery",
    "/wallet/invite",
    "/wallet/announce",
    "/wallet/submit-payment",
];

fn is_public(path: &str) -> bool {
    PUBLIC_PATHS.contains(&path) || path.starts_with("/call/")
}

/// Bearer-token gate for the admin surface.
///
/// When no key is configured (loopback-only deployments) the gate is
/// open; `serve` generates and logs a key before binding any non-loopback
/// interface, so that case never reaches here keyless.
pub async fn require_bearer(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    if is_public(req.uri().path()) {
        return next.run(req).await;
    }
    let Some(expected) = &state.api_key else {
        return next.run(req).await;
    };
    let supplied = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if supplied == Some(expected.as_str()) {
        next.run(req).await
    } else {
        (
            StatusCode::UNAUTHORIZED,
            axum::Json(serde_json::json!({
                "error": {"code": "UNAUTHORIZED", "message": "missing or invalid bearer token"}
            })),
        )
            .into_response()
    }
}

/// Permissive CORS for the public surface.
#[must_use]
pub fn cors_layer() -> CorsLayer {
    CorsLayer::permissive()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_path_set() {
        for path in [
            "/health",
            "/discovery",
            "/wallet/invite",
            "/wallet/announce",
            "/wallet/submit-payment",
            "/call/echo",
            "/call/anything/else",
        ] {
            assert!(is_public(path), "{path}");
        }
        for path in ["/", "/config", "/wallet", "/callx"] {
            assert!(!is_public(path), "{path}");
        }
    }

    #[test]
    fn surface_classification() {
        assert_eq!(classify("/call/echo"), Surface::Call);
        assert_eq!(classify("/health"), Surface::Peer);
        assert_eq!(classify("/wallet/invite"), Surface::Peer);
        assert_eq!(classify("/"), Surface::Admin);
        assert_eq!(classify("/anything"), Surface::Admin);
    }
}
