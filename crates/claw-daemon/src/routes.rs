// SPDX-License-Identifier: MIT OR Apache-2.0
//! Public node routes: health, discovery, invitations, announcements, and
//! the operator's direct payment submission.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use claw_core::{
    AnnouncedCapability, Announcement, DiscoveryManifest, ErrorCode, IdentityKey, Invitation,
    PROTOCOL_TAG, validate_public_endpoint,
};
use claw_peers::PeerRecord;
use claw_protocol::{
    ProtocolError, validate_announcement, validate_invitation, verify_announcement_signature,
    verify_invitation_signature,
};
use claw_wallet::WalletError;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use crate::error::ApiError;
use crate::state::{AppState, INVITE_NONCE_TTL};

/// Reputation for a peer that arrived through a verified invitation.
const INVITED_PEER_REPUTATION: u8 = 50;
/// Reputation for a peer that arrived through a verified announcement.
const ANNOUNCED_PEER_REPUTATION: u8 = 40;

// ---------------------------------------------------------------------------
// GET /health
// ---------------------------------------------------------------------------

/// Liveness probe.
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now(),
        "wallet": {
            "identityKey": state.wallet.identity_key().truncated(),
            "chain": state.config.chain,
            "capabilities": state.capabilities.len(),
        },
        "server": {
            "host": state.config.host,
            "port": state.config.port,
            "uptime": state.started_at.elapsed().as_secs(),
        },
    }))
}

// ---------------------------------------------------------------------------
// GET /discovery
// ---------------------------------------------------------------------------

/// The node manifest other claws probe.
pub async fn discovery(State(state): State<Arc<AppState>>) -> Json<DiscoveryManifest> {
    let base = state.config.endpoint.clone().unwrap_or_default();
    let route = |path: &str| {
        if base.is_empty() {
            path.to_string()
        } else {
            format!("{}{path}", base.trim_end_matches('/'))
        }
    };
    let mut endpoints = BTreeMap::new();
    endpoints.insert("health".to_string(), route("/health"));
    endpoints.insert("invite".to_string(), route("/wallet/invite"));
    endpoints.insert("announce".to_string(), route("/wallet/announce"));
    endpoints.insert("call".to_string(), route("/call"));

    Json(DiscoveryManifest {
        protocol: PROTOCOL_TAG.to_string(),
        claw_id: state.config.claw_id.clone(),
        identity_key: state.wallet.identity_key(),
        capabilities: state.capabilities.names(),
        paid_capabilities: state.capabilities.descriptors(),
        endpoints,
        peers_known: state.peers.len(),
        chain: state.config.chain.clone(),
        timestamp: Utc::now(),
    })
}

// ---------------------------------------------------------------------------
// POST /wallet/invite
// ---------------------------------------------------------------------------

fn protocol_rejection(err: ProtocolError) -> ApiError {
    match err {
        ProtocolError::Expired => {
            ApiError::coded(ErrorCode::InvitationExpired, "invitation expired")
        }
        ProtocolError::MissingSignature => {
            ApiError::coded(ErrorCode::InvalidSignature, "artifact is unsigned")
        }
        ProtocolError::BadSignature => {
            ApiError::coded(ErrorCode::InvalidSignature, "signature verification failed")
        }
        ProtocolError::Malformed(m) => ApiError::new(StatusCode::BAD_REQUEST, m),
        ProtocolError::Wallet(WalletError::Verification(m)) => {
            ApiError::coded(ErrorCode::InvalidSignature, m)
        }
        other => ApiError::internal(other.to_string()),
    }
}

/// Signed-invitation intake.
pub async fn wallet_invite(
    State(state): State<Arc<AppState>>,
    Json(invitation): Json<Invitation>,
) -> Result<impl IntoResponse, ApiError> {
    let sender_key = invitation.sender.identity_key.clone();
    IdentityKey::parse(sender_key.as_str())
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.to_string()))?;

    // Rate limit per sender identity before any expensive work.
    if !state.invite_limiter.allow(sender_key.as_str()) {
        return Err(ApiError::coded(
            ErrorCode::RateLimited,
            "too many invitations from this identity; try later",
        ));
    }

    validate_invitation(&invitation).map_err(protocol_rejection)?;

    // Nonce replay inside the window.
    let nonce_check = state.invite_nonces.validate(&invitation.nonce, INVITE_NONCE_TTL);
    if !nonce_check.fresh {
        return Err(ApiError::coded(
            ErrorCode::NonceReplay,
            nonce_check
                .reason
                .unwrap_or_else(|| "Nonce replay detected".to_string()),
        ));
    }

    // Signature is strictly required and verified.
    verify_invitation_signature(state.wallet.as_ref(), &invitation)
        .await
        .map_err(protocol_rejection)?;

    // Any endpoint a remote hands us is validated before storage.
    if let Some(endpoint) = &invitation.sender.endpoint {
        validate_public_endpoint(endpoint)
            .map_err(|e| ApiError::coded(ErrorCode::InvalidEndpoint, e.to_string()))?;
    }

    let mut record = PeerRecord::new(
        sender_key.clone(),
        invitation.sender.claw_id.clone(),
        invitation.wallet.chain.clone(),
        INVITED_PEER_REPUTATION,
    );
    record.endpoint = invitation.sender.endpoint.clone();
    record.capabilities = invitation.wallet.capabilities.clone();
    state.peers.add(record);

    info!(sender = %sender_key.truncated(), "invitation accepted");
    state.events.log(
        "server",
        "invitation-accepted",
        &format!("from {}", invitation.sender.claw_id),
        Some(json!({"identityKey": sender_key})),
    );

    let announcement = own_announcement(&state).await?;
    Ok(Json(json!({
        "accepted": true,
        "announcement": announcement,
        "peersKnown": state.peers.len(),
    })))
}

/// Build this node's own signed announcement.
pub async fn own_announcement(state: &AppState) -> Result<Announcement, ApiError> {
    let capabilities = state
        .capabilities
        .descriptors()
        .into_iter()
        .map(|d| AnnouncedCapability {
            name: d.name,
            version: Some(claw_core::PROTOCOL_VERSION.to_string()),
            endpoint: state
                .config
                .endpoint
                .as_ref()
                .map(|e| format!("{}/call", e.trim_end_matches('/'))),
            methods: vec!["POST".to_string()],
            rate_limit: None,
            cost_per_call: Some(d.price_sats),
        })
        .collect();
    claw_protocol::create_announcement(
        state.wallet.as_ref(),
        state.config.claw_id.clone(),
        capabilities,
        claw_core::AnnouncementNetwork {
            chain: state.config.chain.clone(),
            endpoint: state.config.endpoint.clone(),
        },
    )
    .await
    .map_err(|e| ApiError::internal(e.to_string()))
}

// ---------------------------------------------------------------------------
// POST /wallet/announce
// ---------------------------------------------------------------------------

/// Signed-announcement intake.
pub async fn wallet_announce(
    State(state): State<Arc<AppState>>,
    Json(announcement): Json<Announcement>,
) -> Result<impl IntoResponse, ApiError> {
    let announcer = announcement.identity_key.clone();
    IdentityKey::parse(announcer.as_str())
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.to_string()))?;

    validate_announcement(&announcement).map_err(protocol_rejection)?;
    verify_announcement_signature(state.wallet.as_ref(), &announcement)
        .await
        .map_err(protocol_rejection)?;

    if let Some(endpoint) = &announcement.network.endpoint {
        validate_public_endpoint(endpoint)
            .map_err(|e| ApiError::coded(ErrorCode::InvalidEndpoint, e.to_string()))?;
    }

    let mut record = PeerRecord::new(
        announcer.clone(),
        announcement.claw_id.clone(),
        announcement.network.chain.clone(),
        ANNOUNCED_PEER_REPUTATION,
    );
    record.endpoint = announcement.network.endpoint.clone();
    record.capabilities = announcement
        .capabilities
        .iter()
        .map(|c| c.name.clone())
        .collect();
    state.peers.add(record);

    // A relayed listing credits its introducer on later paid calls.
    if let Some(referrer) = &announcement.referred_by {
        state
            .referrals
            .record_referrer(announcer.as_str(), referrer.as_str());
    }

    state.events.log(
        "server",
        "announcement-registered",
        &format!("from {}", announcement.claw_id),
        Some(json!({"identityKey": announcer})),
    );

    Ok(Json(json!({
        "registered": true,
        "verified": true,
        "peersKnown": state.peers.len(),
    })))
}

// ---------------------------------------------------------------------------
// POST /wallet/submit-payment
// ---------------------------------------------------------------------------

/// Operator-facing direct payment submission (externally funded
/// transactions). Not on the `/call` hot path.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitPaymentBody {
    /// Raw transaction, base64.
    pub transaction: String,
    /// Derivation prefix for the expected output.
    pub derivation_prefix: String,
    /// Derivation suffix; defaults to `clawsats`.
    #[serde(default)]
    pub derivation_suffix: Option<String>,
    /// Sender identity, when known.
    #[serde(default)]
    pub sender_identity_key: Option<IdentityKey>,
    /// Output index to internalize.
    #[serde(default)]
    pub output_index: u32,
}

/// Internalize an externally funded payment.
pub async fn submit_payment(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SubmitPaymentBody>,
) -> Result<impl IntoResponse, ApiError> {
    let raw_tx = BASE64
        .decode(&body.transaction)
        .map_err(|_| ApiError::coded(ErrorCode::MalformedPayment, "transaction is not base64"))?;
    let sender = body
        .sender_identity_key
        .unwrap_or_else(|| state.wallet.identity_key());
    let suffix = body
        .derivation_suffix
        .unwrap_or_else(|| claw_core::DEFAULT_DERIVATION_SUFFIX.to_string());
    let accepted = state
        .wallet
        .internalize_payment(
            &raw_tx,
            body.output_index,
            &body.derivation_prefix,
            &suffix,
            &sender,
            "operator submit-payment",
        )
        .await
        .map_err(|e| match e {
            WalletError::Internalize { reason } => ApiError::coded(ErrorCode::PaymentInvalid, reason),
            other => ApiError::coded(ErrorCode::PaymentInvalid, other.to_string()),
        })?;
    Ok(Json(json!({"accepted": true, "acceptedSats": accepted.accepted_sats})))
}
