// SPDX-License-Identifier: MIT OR Apache-2.0
//! JSON-RPC 2.0 admin surface on `POST /`.
//!
//! Method params arrive either flat or wrapped as `{args, originator}`;
//! both forms unwrap to the same args object before dispatch.

use axum::Json;
use axum::extract::State;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use claw_brain::{JobInput, JobStatus, SweepOptions};
use claw_client::PaidCallOptions;
use claw_core::{
    FEE_SATS, IdentityKey, InvitationParty, InvitationRecipient, SHARING_KEY_ID, SHARING_PROTOCOL,
    WalletSnapshot,
};
use claw_wallet::{FeeCheck, PaymentOutput, fee_output_check, wire};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::debug;

use crate::dispatch::build_challenge;
use crate::state::AppState;

const ERR_METHOD_NOT_FOUND: i64 = -32601;
const ERR_INVALID_PARAMS: i64 = -32602;
const ERR_EXECUTION: i64 = -32000;

/// JSON-RPC 2.0 request envelope.
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    /// Always `2.0`.
    #[serde(default)]
    pub jsonrpc: String,
    /// Method name.
    pub method: String,
    /// Flat args object or `{args, originator}` wrapper.
    #[serde(default)]
    pub params: Value,
    /// Caller correlation id.
    #[serde(default)]
    pub id: Value,
}

struct RpcError {
    code: i64,
    message: String,
}

impl RpcError {
    fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: ERR_INVALID_PARAMS,
            message: message.into(),
        }
    }

    fn execution(message: impl Into<String>) -> Self {
        Self {
            code: ERR_EXECUTION,
            message: message.into(),
        }
    }
}

/// Accept both `params = argsObj` and `params = {args, originator}`.
fn unwrap_params(params: Value) -> Value {
    match params {
        Value::Object(ref map) if map.contains_key("args") => map
            .get("args")
            .cloned()
            .unwrap_or(Value::Object(serde_json::Map::new())),
        Value::Null => Value::Object(serde_json::Map::new()),
        other => other,
    }
}

fn str_arg(args: &Value, key: &str) -> Result<String, RpcError> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| RpcError::invalid_params(format!("missing string arg '{key}'")))
}

fn identity_arg(args: &Value, key: &str) -> Result<IdentityKey, RpcError> {
    IdentityKey::parse(&str_arg(args, key)?).map_err(|e| RpcError::invalid_params(e.to_string()))
}

/// `POST /` entry point.
pub async fn rpc(State(state): State<Arc<AppState>>, Json(req): Json<RpcRequest>) -> Json<Value> {
    debug!(method = %req.method, "json-rpc request");
    let id = req.id.clone();
    let args = unwrap_params(req.params);

    let outcome = match req.method.as_str() {
        // -- wallet ------------------------------------------------------
        "sign" => sign(&state, &args).await,
        "verify" => verify(&state, &args).await,
        "getPublicKey" => Ok(json!({"identityKey": state.wallet.identity_key()})),
        "createAction" => create_action(&state, &args).await,
        "internalizeAction" => internalize_action(&state, &args).await,
        "listActions" => Ok(json!({"actions": state.wallet.list_actions()})),
        "listOutputs" => list_outputs(&state),
        // -- clawsats ----------------------------------------------------
        "createPaymentChallenge" => create_payment_challenge(&state, &args),
        "verifyPayment" => verify_payment(&state, &args).await,
        "getConfig" => Ok(state.config.redacted()),
        "listPeers" => Ok(json!({"peers": state.peers.all()})),
        "searchCapabilities" => search_capabilities(&state, &args),
        "sendInvitation" => send_invitation(&state, &args).await,
        "hireClaw" => hire_claw(&state, &args).await,
        // -- brain -------------------------------------------------------
        "enqueue" => enqueue(&state, &args),
        "listJobs" => list_jobs(&state, &args),
        "retryFailed" => retry_failed(&state),
        "run" => run_brain(&state, &args).await,
        "getPolicy" => serde_json::to_value(state.policy.get())
            .map_err(|e| RpcError::execution(e.to_string())),
        "setPolicy" => set_policy(&state, &args),
        other => Err(RpcError {
            code: ERR_METHOD_NOT_FOUND,
            message: format!("unknown method '{other}'"),
        }),
    };

    Json(match outcome {
        Ok(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
        Err(e) => json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": e.code, "message": e.message},
        }),
    })
}

async fn sign(state: &AppState, args: &Value) -> Result<Value, RpcError> {
    let data = str_arg(args, "data")?;
    let key_id = args
        .get("keyId")
        .and_then(Value::as_str)
        .unwrap_or(SHARING_KEY_ID);
    let counterparty = args
        .get("counterparty")
        .and_then(Value::as_str)
        .map(IdentityKey::parse)
        .transpose()
        .map_err(|e| RpcError::invalid_params(e.to_string()))?;
    let sig = state
        .wallet
        .sign(
            data.as_bytes(),
            SHARING_PROTOCOL,
            key_id,
            counterparty.as_ref(),
        )
        .await
        .map_err(|e| RpcError::execution(e.to_string()))?;
    Ok(json!({"signature": wire::encode_signature(&sig)}))
}

async fn verify(state: &AppState, args: &Value) -> Result<Value, RpcError> {
    let data = str_arg(args, "data")?;
    let signature = wire::decode_signature(&str_arg(args, "signature")?)
        .ok_or_else(|| RpcError::invalid_params("signature is not base64"))?;
    let counterparty = identity_arg(args, "counterparty")?;
    let key_id = args
        .get("keyId")
        .and_then(Value::as_str)
        .unwrap_or(SHARING_KEY_ID);
    let valid = state
        .wallet
        .verify(
            data.as_bytes(),
            &signature,
            SHARING_PROTOCOL,
            key_id,
            &counterparty,
        )
        .await
        .map_err(|e| RpcError::execution(e.to_string()))?;
    Ok(json!({"valid": valid}))
}

async fn create_action(state: &AppState, args: &Value) -> Result<Value, RpcError> {
    let outputs = args
        .get("outputs")
        .and_then(Value::as_array)
        .ok_or_else(|| RpcError::invalid_params("missing 'outputs' array"))?;
    let mut parsed = Vec::with_capacity(outputs.len());
    for output in outputs {
        let satoshis = output
            .get("satoshis")
            .and_then(Value::as_u64)
            .ok_or_else(|| RpcError::invalid_params("output missing 'satoshis'"))?;
        let script_hex = output
            .get("lockingScript")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("output missing 'lockingScript'"))?;
        let locking_script = hex::decode(script_hex)
            .map_err(|_| RpcError::invalid_params("lockingScript is not hex"))?;
        parsed.push(PaymentOutput {
            satoshis,
            locking_script,
            note: output
                .get("note")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        });
    }
    let description = args
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or("rpc createAction");
    let labels: Vec<String> = args
        .get("labels")
        .and_then(Value::as_array)
        .map(|l| {
            l.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let broadcast = state
        .wallet
        .build_and_broadcast_payment(&parsed, description, &labels)
        .await
        .map_err(|e| RpcError::execution(e.to_string()))?;
    Ok(json!({
        "txid": broadcast.txid,
        "rawTx": BASE64.encode(&broadcast.raw_tx),
    }))
}

async fn internalize_action(state: &AppState, args: &Value) -> Result<Value, RpcError> {
    let raw_tx = BASE64
        .decode(str_arg(args, "transaction")?)
        .map_err(|_| RpcError::invalid_params("transaction is not base64"))?;
    let output_index = args.get("outputIndex").and_then(Value::as_u64).unwrap_or(0) as u32;
    let prefix = str_arg(args, "derivationPrefix")?;
    let suffix = args
        .get("derivationSuffix")
        .and_then(Value::as_str)
        .unwrap_or(claw_core::DEFAULT_DERIVATION_SUFFIX);
    let sender = args
        .get("senderIdentityKey")
        .and_then(Value::as_str)
        .map(IdentityKey::parse)
        .transpose()
        .map_err(|e| RpcError::invalid_params(e.to_string()))?
        .unwrap_or_else(|| state.wallet.identity_key());
    let description = args
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or("rpc internalizeAction");
    let accepted = state
        .wallet
        .internalize_payment(&raw_tx, output_index, &prefix, suffix, &sender, description)
        .await
        .map_err(|e| RpcError::execution(e.to_string()))?;
    Ok(json!({"acceptedSats": accepted.accepted_sats}))
}

fn list_outputs(state: &AppState) -> Result<Value, RpcError> {
    let outputs: Vec<Value> = state
        .wallet
        .list_actions()
        .into_iter()
        .map(|a| json!({"txid": a.txid, "satoshis": a.satoshis, "description": a.description}))
        .collect();
    Ok(json!({"outputs": outputs}))
}

fn create_payment_challenge(state: &AppState, args: &Value) -> Result<Value, RpcError> {
    let capability = str_arg(args, "capability")?;
    let price = state
        .capabilities
        .get(&capability)
        .map(|c| c.price_sats)
        .ok_or_else(|| RpcError::invalid_params(format!("unknown capability '{capability}'")))?;
    let challenge = build_challenge(state, price);
    serde_json::to_value(&challenge).map_err(|e| RpcError::execution(e.to_string()))
}

async fn verify_payment(state: &AppState, args: &Value) -> Result<Value, RpcError> {
    let raw_tx = BASE64
        .decode(str_arg(args, "transaction")?)
        .map_err(|_| RpcError::invalid_params("transaction is not base64"))?;
    let prefix = str_arg(args, "derivationPrefix")?;
    let suffix = args
        .get("derivationSuffix")
        .and_then(Value::as_str)
        .unwrap_or(claw_core::DEFAULT_DERIVATION_SUFFIX);
    let sender = args
        .get("senderIdentityKey")
        .and_then(Value::as_str)
        .map(IdentityKey::parse)
        .transpose()
        .map_err(|e| RpcError::invalid_params(e.to_string()))?
        .unwrap_or_else(|| state.wallet.identity_key());

    let internalized = state
        .wallet
        .internalize_payment(&raw_tx, 0, &prefix, suffix, &sender, "rpc verifyPayment")
        .await;
    let fee = matches!(fee_output_check(&raw_tx, FEE_SATS), FeeCheck::Present);
    match internalized {
        Ok(accepted) => Ok(json!({
            "valid": true,
            "acceptedSats": accepted.accepted_sats,
            "feeOutputPresent": fee,
        })),
        Err(e) => Ok(json!({
            "valid": false,
            "reason": e.to_string(),
            "feeOutputPresent": fee,
        })),
    }
}

fn search_capabilities(state: &AppState, args: &Value) -> Result<Value, RpcError> {
    let query = args
        .get("query")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let local = state.capabilities.search(query);
    let peers: Vec<Value> = state
        .peers
        .all()
        .into_iter()
        .filter(|p| {
            query.is_empty() || p.capabilities.iter().any(|c| c.contains(query))
        })
        .map(|p| json!({"identityKey": p.identity_key, "endpoint": p.endpoint, "capabilities": p.capabilities}))
        .collect();
    Ok(json!({"local": local, "peers": peers}))
}

async fn send_invitation(state: &AppState, args: &Value) -> Result<Value, RpcError> {
    let endpoint = str_arg(args, "endpoint")?;
    let recipient_claw = args
        .get("recipientClawId")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();
    let invitation = claw_protocol::create_invitation(
        state.wallet.as_ref(),
        InvitationParty {
            claw_id: state.config.claw_id.clone(),
            identity_key: state.wallet.identity_key(),
            endpoint: state.config.endpoint.clone(),
        },
        InvitationRecipient {
            claw_id: recipient_claw,
            public_key: state
                .peers
                .get_by_endpoint(&endpoint)
                .map(|p| p.identity_key),
        },
        WalletSnapshot {
            chain: state.config.chain.clone(),
            capabilities: state.capabilities.names(),
            deploy_hint: None,
        },
        claw_protocol::DEFAULT_INVITATION_TTL_SECS,
    )
    .await
    .map_err(|e| RpcError::execution(e.to_string()))?;

    let ack = state
        .client
        .send_invitation(&endpoint, &invitation)
        .await
        .map_err(|e| RpcError::execution(e.to_string()))?;
    Ok(json!({
        "sent": true,
        "accepted": ack.accepted,
        "peersKnown": ack.peers_known,
    }))
}

async fn hire_claw(state: &AppState, args: &Value) -> Result<Value, RpcError> {
    let endpoint = str_arg(args, "endpoint")?;
    let capability = str_arg(args, "capability")?;
    let params = args.get("params").cloned().unwrap_or(json!({}));
    let max_sats = args.get("maxSats").and_then(Value::as_u64);
    let outcome = state
        .client
        .paid_call(&endpoint, &capability, &params, &PaidCallOptions { max_sats })
        .await
        .map_err(|e| RpcError::execution(e.to_string()))?;
    Ok(json!({
        "result": outcome.response.result,
        "satoshisPaid": outcome.response.satoshis_paid,
        "receipt": outcome.response.receipt,
        "paymentTxid": outcome.payment_txid,
    }))
}

fn enqueue(state: &AppState, args: &Value) -> Result<Value, RpcError> {
    let input: JobInput = serde_json::from_value(args.clone())
        .map_err(|e| RpcError::invalid_params(e.to_string()))?;
    if input.capability.is_empty() {
        return Err(RpcError::invalid_params("missing 'capability'"));
    }
    let default_cap = state.policy.get().decisions.auto_hire_max_sats;
    let job = state
        .jobs
        .enqueue(input, default_cap)
        .map_err(|e| RpcError::execution(e.to_string()))?;
    serde_json::to_value(&job).map_err(|e| RpcError::execution(e.to_string()))
}

fn list_jobs(state: &AppState, args: &Value) -> Result<Value, RpcError> {
    let status = match args.get("status").and_then(Value::as_str) {
        Some(s) => Some(
            serde_json::from_value::<JobStatus>(json!(s))
                .map_err(|_| RpcError::invalid_params(format!("unknown status '{s}'")))?,
        ),
        None => None,
    };
    let jobs = state.jobs.list(status);
    Ok(json!({"jobs": jobs}))
}

/// Deep-merge the supplied object over the current policy and persist it.
fn set_policy(state: &AppState, args: &Value) -> Result<Value, RpcError> {
    if !args.is_object() {
        return Err(RpcError::invalid_params("setPolicy takes a JSON object"));
    }
    let mut merged = serde_json::to_value(state.policy.get())
        .map_err(|e| RpcError::execution(e.to_string()))?;
    claw_brain::deep_merge(&mut merged, args.clone());
    let updated: claw_brain::BrainPolicy = serde_json::from_value(merged)
        .map_err(|e| RpcError::invalid_params(format!("policy does not fit the schema: {e}")))?;
    state
        .policy
        .set(updated)
        .map_err(|e| RpcError::execution(e.to_string()))?;
    serde_json::to_value(state.policy.get()).map_err(|e| RpcError::execution(e.to_string()))
}

fn retry_failed(state: &AppState) -> Result<Value, RpcError> {
    let requeued = state
        .jobs
        .retry_failed()
        .map_err(|e| RpcError::execution(e.to_string()))?;
    Ok(json!({"requeued": requeued}))
}

async fn run_brain(state: &AppState, args: &Value) -> Result<Value, RpcError> {
    let allow_memory_writes = args
        .get("allowMemoryWrites")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let limit = args
        .get("limit")
        .and_then(Value::as_u64)
        .map(|n| n as usize);
    let generated = state.router.generate_goal_jobs();
    let report = state
        .router
        .run_sweep(SweepOptions {
            allow_memory_writes,
            limit,
        })
        .await;
    Ok(json!({
        "goalsGenerated": generated,
        "examined": report.examined,
        "completed": report.completed,
        "failed": report.failed,
        "awaitingApproval": report.awaiting_approval,
        "hired": report.hired,
        "local": report.local,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_unwrap_both_forms() {
        let flat = json!({"capability": "echo"});
        assert_eq!(unwrap_params(flat.clone()), flat);

        let wrapped = json!({"args": {"capability": "echo"}, "originator": "cli"});
        assert_eq!(unwrap_params(wrapped), json!({"capability": "echo"}));

        assert_eq!(unwrap_params(Value::Null), json!({}));
    }
}
