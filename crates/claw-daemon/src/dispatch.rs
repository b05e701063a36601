// SPDX-License-Identifier: MIT OR Apache-2.0
//! The 402 payment state machine behind `POST /call/:cap`.
//!
//! A capability handler runs at most once per distinct payment
//! transaction hash, and only ever under a verified payment or a one-shot
//! free trial. Every paid execution produces a receipt signed by the
//! provider. A wallet failure after the payment was internalized still
//! returns 500 and the payment stays consumed — replay protection, not a
//! refund path.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use claw_core::{
    DEFAULT_DERIVATION_SUFFIX, ErrorCode, FEE_DERIVATION_SUFFIX, FEE_IDENTITY_KEY, FEE_KID,
    FEE_SATS, IdentityKey, PROTOCOL_VERSION, PaidCallResponse, PaymentChallenge, PaymentProof,
    RECEIPT_KEY_ID, RECEIPT_PROTOCOL, Receipt, canonical_for_signing, headers as wire_headers,
    sha256_hex,
};
use claw_peers::PeerRecord;
use claw_wallet::{FeeCheck, WalletError, fee_output_check, wire};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

/// Reputation granted to a caller first seen through a paid call.
const PAID_CALLER_REPUTATION: u8 = 10;

fn parse_params(body: &Bytes) -> Result<Value, ApiError> {
    if body.is_empty() {
        return Ok(Value::Object(serde_json::Map::new()));
    }
    serde_json::from_slice(body)
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, format!("body is not JSON: {e}")))
}

fn caller_identity(headers: &HeaderMap) -> Option<IdentityKey> {
    headers
        .get(wire_headers::IDENTITY_KEY)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| IdentityKey::parse(v).ok())
}

/// Build a fresh challenge for `price_sats`.
pub(crate) fn build_challenge(state: &AppState, price_sats: u64) -> PaymentChallenge {
    let prefix: [u8; 16] = rand::random();
    PaymentChallenge {
        version: PROTOCOL_VERSION.to_string(),
        satoshis_required: price_sats,
        derivation_prefix: BASE64.encode(prefix),
        provider_identity_key: state.wallet.identity_key(),
        fee_satoshis_required: FEE_SATS,
        fee_kid: FEE_KID.to_string(),
        fee_derivation_suffix: FEE_DERIVATION_SUFFIX.to_string(),
        fee_identity_key: IdentityKey::parse(FEE_IDENTITY_KEY)
            .expect("fee constant checked at startup"),
    }
}

fn challenge_response(challenge: &PaymentChallenge) -> Response {
    let mut response =
        (StatusCode::PAYMENT_REQUIRED, Json(serde_json::json!(challenge))).into_response();
    let headers = response.headers_mut();
    let mut set = |name: &'static str, value: String| {
        if let Ok(v) = value.parse() {
            headers.insert(name, v);
        }
    };
    set(wire_headers::PAYMENT_VERSION, challenge.version.clone());
    set(
        wire_headers::SATOSHIS_REQUIRED,
        challenge.satoshis_required.to_string(),
    );
    set(
        wire_headers::DERIVATION_PREFIX,
        challenge.derivation_prefix.clone(),
    );
    set(
        wire_headers::IDENTITY_KEY,
        challenge.provider_identity_key.as_str().to_string(),
    );
    set(
        wire_headers::FEE_SATOSHIS_REQUIRED,
        challenge.fee_satoshis_required.to_string(),
    );
    set(wire_headers::FEE_KID, challenge.fee_kid.clone());
    set(
        wire_headers::FEE_DERIVATION_SUFFIX,
        challenge.fee_derivation_suffix.clone(),
    );
    set(
        wire_headers::FEE_IDENTITY_KEY,
        challenge.fee_identity_key.as_str().to_string(),
    );
    response
}

async fn run_handler(
    state: &AppState,
    capability: &claw_capability::Capability,
    params: Value,
) -> Result<Value, ApiError> {
    let cx = state.handler_context();
    capability
        .handler
        .call(params, &cx)
        .await
        .map_err(|e| match e {
            claw_capability::HandlerError::InvalidParams(m) => {
                ApiError::new(StatusCode::BAD_REQUEST, m)
            }
            claw_capability::HandlerError::Rejected(m) => {
                ApiError::new(StatusCode::BAD_REQUEST, m)
            }
            other => ApiError::internal(other.to_string()),
        })
}

async fn sign_receipt(state: &AppState, receipt: &mut Receipt) -> Result<(), ApiError> {
    let view = canonical_for_signing(receipt)
        .map_err(|e| ApiError::internal(format!("receipt canonicalization: {e}")))?;
    let sig = state
        .wallet
        .sign(view.as_bytes(), RECEIPT_PROTOCOL, RECEIPT_KEY_ID, None)
        .await
        .map_err(|e| ApiError::internal(format!("receipt signing: {e}")))?;
    receipt.signature = wire::encode_signature(&sig);
    Ok(())
}

fn register_caller(state: &AppState, caller: &IdentityKey) {
    if state.peers.get(caller).is_none() {
        let mut record = PeerRecord::new(
            caller.clone(),
            format!("claw-{}", caller.truncated()),
            state.config.chain.clone(),
            PAID_CALLER_REPUTATION,
        );
        record.last_seen = Utc::now();
        state.peers.add(record);
    }
}

/// `POST /call/{cap}` — the dispatcher state machine.
pub async fn call_capability(
    State(state): State<Arc<AppState>>,
    Path(cap): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    // 1. Capability lookup.
    let capability = state
        .capabilities
        .get(&cap)
        .ok_or_else(|| ApiError::coded(ErrorCode::UnknownCapability, format!("no capability '{cap}'")))?;
    let params = parse_params(&body)?;
    let caller = caller_identity(&headers);

    // 2. No payment header: free trial or challenge.
    let Some(payment_header) = headers
        .get(wire_headers::PAYMENT)
        .and_then(|v| v.to_str().ok())
    else {
        if let Some(caller) = &caller {
            if state.free_trials.insert(caller.as_str()) {
                info!(capability = %cap, caller = %caller.truncated(), "free trial granted");
                let result = run_handler(&state, &capability, params).await?;
                return Ok(Json(PaidCallResponse {
                    result,
                    satoshis_paid: 0,
                    receipt: None,
                    free_trial: Some(true),
                })
                .into_response());
            }
        }
        let challenge = build_challenge(&state, capability.price_sats);
        return Ok(challenge_response(&challenge));
    };

    // 3. Parse the proof.
    let proof: PaymentProof = serde_json::from_str(payment_header).map_err(|e| {
        ApiError::coded(ErrorCode::MalformedPayment, format!("payment header: {e}"))
    })?;
    let raw_tx = BASE64.decode(&proof.transaction).map_err(|_| {
        ApiError::coded(ErrorCode::MalformedPayment, "transaction is not base64")
    })?;

    // 4. Replay guard on the transaction hash.
    let tx_hash = sha256_hex(&raw_tx);
    if state.payment_dedupe.contains(&tx_hash) {
        return Err(ApiError::coded(
            ErrorCode::PaymentReplay,
            "payment transaction already consumed",
        ));
    }

    // 5. Internalize — the authoritative gate.
    let suffix = proof
        .derivation_suffix
        .clone()
        .unwrap_or_else(|| DEFAULT_DERIVATION_SUFFIX.to_string());
    let sender = caller
        .clone()
        .unwrap_or_else(|| state.wallet.identity_key());
    let accepted = state
        .wallet
        .internalize_payment(
            &raw_tx,
            0,
            &proof.derivation_prefix,
            &suffix,
            &sender,
            &format!("payment for {cap}"),
        )
        .await
        .map_err(|e| match e {
            WalletError::Internalize { reason } => {
                ApiError::coded(ErrorCode::PaymentInvalid, reason)
            }
            other => ApiError::coded(ErrorCode::PaymentInvalid, other.to_string()),
        })?;

    // 6. Underpayment.
    if accepted.accepted_sats < capability.price_sats {
        return Err(ApiError::coded(
            ErrorCode::Underpayment,
            format!(
                "accepted {} sats, capability costs {}",
                accepted.accepted_sats, capability.price_sats
            ),
        ));
    }

    // 7. Structural fee check; defense-in-depth only.
    match fee_output_check(&raw_tx, FEE_SATS) {
        FeeCheck::Present => {}
        FeeCheck::Missing => {
            return Err(ApiError::coded(
                ErrorCode::MissingFee,
                format!("no output beyond index 0 carries the {FEE_SATS}-sat protocol fee"),
            ));
        }
        FeeCheck::Indeterminate => {
            warn!(capability = %cap, "fee check indeterminate; trusting wallet internalization");
        }
    }

    // 8. Mark the transaction consumed.
    state.payment_dedupe.insert(&tx_hash);

    // 9. Execute. Failures past this point do not refund the payment.
    let result = run_handler(&state, &capability, params).await?;

    // 10. Receipt.
    let mut receipt = Receipt::unsigned(
        Uuid::new_v4().to_string(),
        cap.clone(),
        state.wallet.identity_key(),
        caller.clone(),
        accepted.accepted_sats,
        FEE_SATS,
        &result,
    )
    .map_err(|e| ApiError::internal(format!("receipt assembly: {e}")))?;
    sign_receipt(&state, &mut receipt).await?;

    // 11. Bookkeeping: the caller becomes a low-trust peer, counters and
    // referral credit move.
    if let Some(caller) = &caller {
        register_caller(&state, caller);
        state.unique_callers.insert(caller.as_str());
        state.referrals.credit_introducer(caller.as_str());
    }
    state.stats.record(&cap);
    state.events.log(
        "dispatcher",
        "paid-call",
        &format!("{cap} served for {} sats", accepted.accepted_sats),
        None,
    );

    let satoshis_paid = accepted.accepted_sats;
    let mut response = Json(PaidCallResponse {
        result,
        satoshis_paid,
        receipt: Some(receipt),
        free_trial: None,
    })
    .into_response();
    if let Ok(v) = satoshis_paid.to_string().parse() {
        response
            .headers_mut()
            .insert(wire_headers::SATOSHIS_PAID, v);
    }
    Ok(response)
}
