// SPDX-License-Identifier: MIT OR Apache-2.0
//! Built-in handler implementations.
//!
//! Prices and tags are hard-configured here. Handlers validate their own
//! params; the dispatcher never parses param schemas.

use async_trait::async_trait;
use chrono::Utc;
use claw_core::{
    Announcement, Receipt, RECEIPT_KEY_ID, RECEIPT_PROTOCOL, SHARING_KEY_ID, SHARING_PROTOCOL,
    canonical_for_signing, dns_hostname_allowed, sha256_hex, validate_public_endpoint,
};
use claw_wallet::wire;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::{Capability, CapabilityHandler, CapabilityRegistry, HandlerContext, HandlerError, RegistryError};

/// Relay hop ceiling for `broadcast_listing`.
pub const HOP_LIMIT: u32 = 2;

/// Relay audience ceiling for `broadcast_listing`.
pub const AUDIENCE_LIMIT: usize = 10;

/// Response-body ceiling for `fetch_url`, bytes.
pub const FETCH_MAX_BYTES: usize = 100_000;

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(8);
const RELAY_TIMEOUT: Duration = Duration::from_secs(5);

fn str_param(params: &Value, key: &str) -> Result<String, HandlerError> {
    params
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| HandlerError::InvalidParams(format!("missing string param '{key}'")))
}

async fn sharing_signature(cx: &HandlerContext, data: &[u8]) -> Result<String, HandlerError> {
    let sig = cx
        .wallet
        .sign(data, SHARING_PROTOCOL, SHARING_KEY_ID, None)
        .await?;
    Ok(wire::encode_signature(&sig))
}

// ---------------------------------------------------------------------------
// echo
// ---------------------------------------------------------------------------

struct Echo;

#[async_trait]
impl CapabilityHandler for Echo {
    async fn call(&self, params: Value, cx: &HandlerContext) -> Result<Value, HandlerError> {
        let message = str_param(&params, "message")?;
        let nonce = format!("{:08x}", rand::random::<u32>());
        let signature = sharing_signature(cx, message.as_bytes()).await?;
        Ok(json!({
            "message": message,
            "nonce": nonce,
            "signedBy": cx.wallet.identity_key(),
            "signature": signature,
        }))
    }
}

// ---------------------------------------------------------------------------
// sign_message
// ---------------------------------------------------------------------------

struct SignMessage;

#[async_trait]
impl CapabilityHandler for SignMessage {
    async fn call(&self, params: Value, cx: &HandlerContext) -> Result<Value, HandlerError> {
        let message = str_param(&params, "message")?;
        let signature = sharing_signature(cx, message.as_bytes()).await?;
        Ok(json!({
            "message": message,
            "signature": signature,
            "signer": cx.wallet.identity_key(),
        }))
    }
}

// ---------------------------------------------------------------------------
// hash_commit
// ---------------------------------------------------------------------------

struct HashCommit;

#[async_trait]
impl CapabilityHandler for HashCommit {
    async fn call(&self, params: Value, cx: &HandlerContext) -> Result<Value, HandlerError> {
        let data = str_param(&params, "data")?;
        let digest = sha256_hex(data.as_bytes());
        let signature = sharing_signature(cx, digest.as_bytes()).await?;
        Ok(json!({
            "dataSha256": digest,
            "signedBy": cx.wallet.identity_key(),
            "signature": signature,
        }))
    }
}

// ---------------------------------------------------------------------------
// timestamp_attest
// ---------------------------------------------------------------------------

struct TimestampAttest;

#[async_trait]
impl CapabilityHandler for TimestampAttest {
    async fn call(&self, params: Value, cx: &HandlerContext) -> Result<Value, HandlerError> {
        // Either a precomputed digest or raw data to hash.
        let subject = match params.get("subjectSha256").and_then(Value::as_str) {
            Some(digest) => {
                if digest.len() != 64 || !digest.bytes().all(|b| b.is_ascii_hexdigit()) {
                    return Err(HandlerError::InvalidParams(
                        "subjectSha256 must be 64 hex chars".into(),
                    ));
                }
                digest.to_ascii_lowercase()
            }
            None => sha256_hex(str_param(&params, "data")?.as_bytes()),
        };
        let timestamp = Utc::now();
        let attestation = json!({
            "subjectSha256": subject,
            "timestamp": timestamp,
        });
        let view = canonical_for_signing(&attestation)
            .map_err(|e| HandlerError::Upstream(e.to_string()))?;
        let signature = sharing_signature(cx, view.as_bytes()).await?;
        Ok(json!({
            "subjectSha256": subject,
            "timestamp": timestamp,
            "signedBy": cx.wallet.identity_key(),
            "signature": signature,
        }))
    }
}

// ---------------------------------------------------------------------------
// fetch_url
// ---------------------------------------------------------------------------

struct FetchUrl;

#[async_trait]
impl CapabilityHandler for FetchUrl {
    async fn call(&self, params: Value, cx: &HandlerContext) -> Result<Value, HandlerError> {
        let raw_url = str_param(&params, "url")?;
        let url = validate_public_endpoint(&raw_url)
            .map_err(|e| HandlerError::Rejected(e.to_string()))?;

        let method = params
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("GET")
            .to_ascii_uppercase();
        if method != "GET" && method != "HEAD" {
            return Err(HandlerError::Rejected(format!(
                "method {method} not allowed"
            )));
        }

        let cap = params
            .get("maxBytes")
            .and_then(Value::as_u64)
            .map_or(FETCH_MAX_BYTES, |n| (n as usize).min(FETCH_MAX_BYTES));

        let request = match method.as_str() {
            "HEAD" => cx.http.head(url.clone()),
            _ => cx.http.get(url.clone()),
        };
        let response = request
            .timeout(FETCH_TIMEOUT)
            .send()
            .await
            .map_err(|e| HandlerError::Upstream(format!("fetch failed: {e}")))?;

        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| HandlerError::Upstream(format!("body read failed: {e}")))?;
        let truncated = bytes.len() > cap;
        let body = &bytes[..bytes.len().min(cap)];
        let body_sha256 = sha256_hex(body);
        let signature = sharing_signature(cx, body_sha256.as_bytes()).await?;

        Ok(json!({
            "url": url.to_string(),
            "status": status,
            "truncated": truncated,
            "body": String::from_utf8_lossy(body),
            "bodySha256": body_sha256,
            "signedBy": cx.wallet.identity_key(),
            "signature": signature,
        }))
    }
}

// ---------------------------------------------------------------------------
// dns_resolve
// ---------------------------------------------------------------------------

struct DnsResolve;

#[async_trait]
impl CapabilityHandler for DnsResolve {
    async fn call(&self, params: Value, _cx: &HandlerContext) -> Result<Value, HandlerError> {
        let hostname = str_param(&params, "hostname")?;
        if !dns_hostname_allowed(&hostname) {
            return Err(HandlerError::Rejected(format!(
                "hostname '{hostname}' is blocked"
            )));
        }
        let record_type = params
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("A")
            .to_ascii_uppercase();

        let resolver = hickory_resolver::TokioResolver::builder_tokio()
            .map_err(|e| HandlerError::Upstream(format!("resolver init: {e}")))?
            .build();

        let records: Vec<String> = match record_type.as_str() {
            "A" => resolver
                .ipv4_lookup(hostname.clone())
                .await
                .map_err(|e| HandlerError::Upstream(e.to_string()))?
                .iter()
                .map(ToString::to_string)
                .collect(),
            "AAAA" => resolver
                .ipv6_lookup(hostname.clone())
                .await
                .map_err(|e| HandlerError::Upstream(e.to_string()))?
                .iter()
                .map(ToString::to_string)
                .collect(),
            "MX" => resolver
                .mx_lookup(hostname.clone())
                .await
                .map_err(|e| HandlerError::Upstream(e.to_string()))?
                .iter()
                .map(|mx| format!("{} {}", mx.preference(), mx.exchange()))
                .collect(),
            "TXT" => resolver
                .txt_lookup(hostname.clone())
                .await
                .map_err(|e| HandlerError::Upstream(e.to_string()))?
                .iter()
                .map(ToString::to_string)
                .collect(),
            "NS" => resolver
                .ns_lookup(hostname.clone())
                .await
                .map_err(|e| HandlerError::Upstream(e.to_string()))?
                .iter()
                .map(ToString::to_string)
                .collect(),
            other => {
                return Err(HandlerError::InvalidParams(format!(
                    "unsupported record type '{other}'"
                )));
            }
        };

        Ok(json!({
            "hostname": hostname,
            "type": record_type,
            "records": records,
        }))
    }
}

// ---------------------------------------------------------------------------
// broadcast_listing
// ---------------------------------------------------------------------------

struct BroadcastListing;

#[async_trait]
impl CapabilityHandler for BroadcastListing {
    async fn call(&self, params: Value, cx: &HandlerContext) -> Result<Value, HandlerError> {
        let hop_count = params
            .get("hopCount")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32;
        if hop_count >= HOP_LIMIT {
            return Err(HandlerError::Rejected(format!(
                "hop count {hop_count} reached the relay limit"
            )));
        }

        let manifest_value = params
            .get("manifest")
            .cloned()
            .ok_or_else(|| HandlerError::InvalidParams("missing 'manifest'".into()))?;
        let mut manifest: Announcement = serde_json::from_value(manifest_value)
            .map_err(|e| HandlerError::InvalidParams(format!("bad manifest: {e}")))?;

        let dedupe_key = format!("{}:{}", manifest.identity_key, manifest.announcement_id);
        if !cx.relay_seen.insert(&dedupe_key) {
            debug!(key = %dedupe_key, "listing already relayed");
            return Ok(json!({
                "notified": [],
                "hopCount": hop_count + 1,
                "deduped": true,
            }));
        }

        let audience_cap = params
            .get("maxPeers")
            .and_then(Value::as_u64)
            .map_or(AUDIENCE_LIMIT, |n| (n as usize).min(AUDIENCE_LIMIT));

        // Tag the relayed manifest with this relayer before forwarding.
        manifest.referred_by = Some(cx.wallet.identity_key());

        let own_key = cx.wallet.identity_key();
        let mut candidates: Vec<String> = cx
            .peers
            .all()
            .into_iter()
            .filter(|p| p.identity_key != manifest.identity_key && p.identity_key != own_key)
            .filter_map(|p| p.endpoint)
            .collect();
        candidates.sort();
        candidates.dedup();
        candidates.truncate(audience_cap);

        let mut notified = Vec::new();
        for endpoint in candidates {
            let target = format!("{}/wallet/announce", endpoint.trim_end_matches('/'));
            let outcome = cx
                .http
                .post(&target)
                .timeout(RELAY_TIMEOUT)
                .json(&manifest)
                .send()
                .await;
            match outcome {
                Ok(resp) if resp.status().is_success() => notified.push(endpoint),
                Ok(resp) => {
                    warn!(endpoint = %endpoint, status = %resp.status(), "relay target refused listing");
                }
                Err(e) => {
                    warn!(endpoint = %endpoint, error = %e, "relay post failed");
                }
            }
        }

        Ok(json!({
            "notified": notified,
            "hopCount": hop_count + 1,
        }))
    }
}

// ---------------------------------------------------------------------------
// verify_receipt
// ---------------------------------------------------------------------------

struct VerifyReceipt;

#[async_trait]
impl CapabilityHandler for VerifyReceipt {
    async fn call(&self, params: Value, cx: &HandlerContext) -> Result<Value, HandlerError> {
        let receipt_value = params
            .get("receipt")
            .cloned()
            .ok_or_else(|| HandlerError::InvalidParams("missing 'receipt'".into()))?;
        let receipt: Receipt = serde_json::from_value(receipt_value)
            .map_err(|e| HandlerError::InvalidParams(format!("bad receipt: {e}")))?;

        let mut checks = Vec::new();

        let signature_present = !receipt.signature.is_empty();
        checks.push(json!({
            "name": "signature_present",
            "passed": signature_present,
        }));

        let signature_valid = if signature_present {
            let view = canonical_for_signing(&receipt)
                .map_err(|e| HandlerError::Upstream(e.to_string()))?;
            let sig = wire::decode_signature(&receipt.signature).unwrap_or_default();
            cx.wallet
                .verify(
                    view.as_bytes(),
                    &sig,
                    RECEIPT_PROTOCOL,
                    RECEIPT_KEY_ID,
                    &receipt.provider,
                )
                .await?
        } else {
            false
        };
        checks.push(json!({
            "name": "signature_valid",
            "passed": signature_valid,
        }));

        let hash_well_formed = receipt.result_sha256.len() == 64
            && receipt.result_sha256.bytes().all(|b| b.is_ascii_hexdigit());
        checks.push(json!({
            "name": "result_hash_well_formed",
            "passed": hash_well_formed,
        }));

        let valid = signature_present && signature_valid && hash_well_formed;
        Ok(json!({
            "valid": valid,
            "checks": checks,
        }))
    }
}

// ---------------------------------------------------------------------------
// peer_health_check
// ---------------------------------------------------------------------------

struct PeerHealthCheck;

#[async_trait]
impl CapabilityHandler for PeerHealthCheck {
    async fn call(&self, params: Value, cx: &HandlerContext) -> Result<Value, HandlerError> {
        let endpoint = str_param(&params, "endpoint")?;
        let url = validate_public_endpoint(&endpoint)
            .map_err(|e| HandlerError::Rejected(e.to_string()))?;
        let target = format!("{}/health", url.to_string().trim_end_matches('/'));

        let started = Instant::now();
        let outcome = cx.http.get(&target).timeout(HEALTH_TIMEOUT).send().await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(resp) => Ok(json!({
                "endpoint": endpoint,
                "reachable": resp.status().is_success(),
                "status": resp.status().as_u16(),
                "latencyMs": latency_ms,
            })),
            Err(e) => Ok(json!({
                "endpoint": endpoint,
                "reachable": false,
                "error": e.to_string(),
                "latencyMs": latency_ms,
            })),
        }
    }
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

fn capability(
    name: &str,
    description: &str,
    price_sats: u64,
    tags: &[&str],
    handler: Arc<dyn CapabilityHandler>,
) -> Capability {
    Capability {
        name: name.to_string(),
        description: description.to_string(),
        price_sats,
        tags: tags.iter().map(ToString::to_string).collect(),
        handler,
    }
}

/// Register every built-in capability. Must run before the HTTP server
/// accepts traffic.
///
/// # Errors
///
/// [`RegistryError::DuplicateName`] when called twice on one registry.
pub fn register_builtins(registry: &CapabilityRegistry) -> Result<(), RegistryError> {
    registry.register(capability(
        "echo",
        "Echo a message back, signed by this node",
        10,
        &["util"],
        Arc::new(Echo),
    ))?;
    registry.register(capability(
        "sign_message",
        "Sign an arbitrary message with this node's sharing key",
        25,
        &["crypto"],
        Arc::new(SignMessage),
    ))?;
    registry.register(capability(
        "hash_commit",
        "SHA-256 commitment over supplied data, signed",
        15,
        &["crypto"],
        Arc::new(HashCommit),
    ))?;
    registry.register(capability(
        "timestamp_attest",
        "Signed attestation that a digest existed at a point in time",
        20,
        &["crypto", "attest"],
        Arc::new(TimestampAttest),
    ))?;
    registry.register(capability(
        "fetch_url",
        "Fetch a public URL and return the hashed, signed body",
        50,
        &["net"],
        Arc::new(FetchUrl),
    ))?;
    registry.register(capability(
        "dns_resolve",
        "Resolve DNS records for a public hostname",
        30,
        &["net"],
        Arc::new(DnsResolve),
    ))?;
    registry.register(capability(
        "broadcast_listing",
        "Relay a signed capability listing to known peers",
        40,
        &["relay", "growth"],
        Arc::new(BroadcastListing),
    ))?;
    registry.register(capability(
        "verify_receipt",
        "Verify a payment receipt signature and structure",
        15,
        &["crypto"],
        Arc::new(VerifyReceipt),
    ))?;
    registry.register(capability(
        "peer_health_check",
        "Probe a peer's health endpoint and report latency",
        20,
        &["net"],
        Arc::new(PeerHealthCheck),
    ))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use claw_guard::FifoSet;
    use claw_peers::PeerRegistry;
    use claw_wallet::{DevWallet, WalletGateway};

    fn context() -> HandlerContext {
        HandlerContext {
            wallet: Arc::new(DevWallet::generate()),
            peers: Arc::new(PeerRegistry::in_memory()),
            http: reqwest::Client::new(),
            claw_id: "test-claw".into(),
            chain: "test".into(),
            relay_seen: FifoSet::new(100),
        }
    }

    #[test]
    fn builtins_register_once() {
        let registry = CapabilityRegistry::new();
        register_builtins(&registry).unwrap();
        assert_eq!(registry.len(), 9);
        assert!(register_builtins(&registry).is_err());
    }

    #[tokio::test]
    async fn echo_returns_signed_message() {
        let cx = context();
        let out = Echo
            .call(json!({"message": "hi"}), &cx)
            .await
            .unwrap();
        assert_eq!(out["message"], "hi");
        assert_eq!(out["nonce"].as_str().unwrap().len(), 8);
        assert_eq!(
            out["signedBy"].as_str().unwrap(),
            cx.wallet.identity_key().as_str()
        );

        // The signature verifies against the node's identity.
        let sig = wire::decode_signature(out["signature"].as_str().unwrap()).unwrap();
        let ok = cx
            .wallet
            .verify(
                b"hi",
                &sig,
                SHARING_PROTOCOL,
                SHARING_KEY_ID,
                &cx.wallet.identity_key(),
            )
            .await
            .unwrap();
        assert!(ok);
    }

    #[tokio::test]
    async fn echo_requires_message() {
        let cx = context();
        let err = Echo.call(json!({}), &cx).await.unwrap_err();
        assert!(matches!(err, HandlerError::InvalidParams(_)));
    }

    #[tokio::test]
    async fn hash_commit_is_deterministic() {
        let cx = context();
        let a = HashCommit.call(json!({"data": "claw"}), &cx).await.unwrap();
        let b = HashCommit.call(json!({"data": "claw"}), &cx).await.unwrap();
        assert_eq!(a["dataSha256"], b["dataSha256"]);
        assert_eq!(a["dataSha256"], json!(sha256_hex(b"claw")));
    }

    #[tokio::test]
    async fn timestamp_attest_rejects_bad_digest() {
        let cx = context();
        let err = TimestampAttest
            .call(json!({"subjectSha256": "zz"}), &cx)
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::InvalidParams(_)));
    }

    #[tokio::test]
    async fn fetch_url_blocks_private_targets() {
        let cx = context();
        for bad in [
            "http://localhost/x",
            "http://127.0.0.1/x",
            "http://10.0.0.1/x",
            "http://192.168.1.1/x",
            "http://169.254.169.254/latest",
            "ftp://example.com/x",
        ] {
            let err = FetchUrl.call(json!({"url": bad}), &cx).await.unwrap_err();
            assert!(matches!(err, HandlerError::Rejected(_)), "{bad}");
        }
    }

    #[tokio::test]
    async fn fetch_url_blocks_unlisted_methods() {
        let cx = context();
        let err = FetchUrl
            .call(json!({"url": "http://claw.example.com", "method": "POST"}), &cx)
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Rejected(_)));
    }

    #[tokio::test]
    async fn dns_resolve_blocks_internal_names() {
        let cx = context();
        for bad in ["localhost", "printer.local", "db.internal"] {
            let err = DnsResolve
                .call(json!({"hostname": bad, "type": "A"}), &cx)
                .await
                .unwrap_err();
            assert!(matches!(err, HandlerError::Rejected(_)), "{bad}");
        }
    }

    #[tokio::test]
    async fn dns_resolve_rejects_unknown_type() {
        let cx = context();
        let err = DnsResolve
            .call(json!({"hostname": "example.com", "type": "SRV"}), &cx)
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::InvalidParams(_)));
    }

    async fn sample_manifest(wallet: &DevWallet) -> Announcement {
        claw_protocol::create_announcement(
            wallet,
            "remote".into(),
            vec![],
            claw_core::AnnouncementNetwork {
                chain: "test".into(),
                endpoint: None,
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn broadcast_rejects_at_hop_limit() {
        let cx = context();
        let remote = DevWallet::generate();
        let manifest = sample_manifest(&remote).await;
        let err = BroadcastListing
            .call(
                json!({"manifest": manifest, "hopCount": HOP_LIMIT}),
                &cx,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Rejected(_)));
    }

    #[tokio::test]
    async fn broadcast_dedupes_repeat_listings() {
        let cx = context();
        let remote = DevWallet::generate();
        let manifest = sample_manifest(&remote).await;

        let first = BroadcastListing
            .call(json!({"manifest": manifest.clone(), "hopCount": 0}), &cx)
            .await
            .unwrap();
        assert!(first.get("deduped").is_none());
        assert_eq!(first["hopCount"], 1);

        let second = BroadcastListing
            .call(json!({"manifest": manifest, "hopCount": 0}), &cx)
            .await
            .unwrap();
        assert_eq!(second["deduped"], true);
        assert_eq!(second["notified"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn verify_receipt_round_trip() {
        let cx = context();
        let provider = DevWallet::generate();

        let mut receipt = Receipt::unsigned(
            "r-1".into(),
            "echo".into(),
            provider.identity_key(),
            None,
            10,
            2,
            &json!({"message": "hi"}),
        )
        .unwrap();
        let view = canonical_for_signing(&receipt).unwrap();
        let sig = provider
            .sign(view.as_bytes(), RECEIPT_PROTOCOL, RECEIPT_KEY_ID, None)
            .await
            .unwrap();
        receipt.signature = wire::encode_signature(&sig);

        let out = VerifyReceipt
            .call(json!({"receipt": receipt.clone()}), &cx)
            .await
            .unwrap();
        assert_eq!(out["valid"], true);

        // Tamper with the paid amount: signature no longer covers it.
        let mut bad = receipt;
        bad.satoshis_paid = 9999;
        let out = VerifyReceipt.call(json!({"receipt": bad}), &cx).await.unwrap();
        assert_eq!(out["valid"], false);
    }

    #[tokio::test]
    async fn peer_health_check_validates_endpoint() {
        let cx = context();
        let err = PeerHealthCheck
            .call(json!({"endpoint": "http://127.0.0.1:3321"}), &cx)
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Rejected(_)));
    }
}
