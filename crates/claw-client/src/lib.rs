// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! claw-client
#![deny(unsafe_code)]
#![warn(missing_docs)]

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use claw_core::{
    DEFAULT_DERIVATION_SUFFIX, DiscoveryManifest, IdentityKey, Invitation, PaidCallResponse,
    PaymentProof, headers, normalize_endpoint,
};
use claw_wallet::{PaymentOutput, WalletError, WalletGateway};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Deadline for `GET /discovery` probes.
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(8);
/// Deadline for invitation and announcement POSTs.
pub const INVITE_TIMEOUT: Duration = Duration::from_secs(10);
/// Deadline for a paid `/call` round.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(30);
/// Deadline for directory interactions.
pub const DIRECTORY_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from the hiring client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The HTTP transport failed (refused, timed out, DNS).
    #[error("transport: {0}")]
    Http(#[from] reqwest::Error),

    /// The wallet driver failed while building the payment.
    #[error(transparent)]
    Wallet(#[from] WalletError),

    /// The remote answered with a failure status.
    #[error("remote rejected ({status}): {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Error code tag when the body carried one.
        code: Option<String>,
        /// Body or reason text.
        message: String,
    },

    /// Provider price plus protocol fee exceed the caller's cap.
    #[error("spend cap exceeded: call costs {required} sats, cap is {cap}")]
    SpendCapExceeded {
        /// Total satoshis the call would cost.
        required: u64,
        /// The configured cap.
        cap: u64,
    },

    /// A 402 challenge was missing a required header.
    #[error("challenge missing header {0}")]
    MissingChallengeHeader(&'static str),

    /// A response body could not be decoded.
    #[error("undecodable response: {0}")]
    Decode(String),
}

fn rejection(status: u16, body: &str) -> ClientError {
    // Error bodies are `{"error": {"code": ..., "message": ...}}`; fall
    // back to the raw text for anything else.
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let code = parsed
        .as_ref()
        .and_then(|v| v.pointer("/error/code"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let message = parsed
        .as_ref()
        .and_then(|v| v.pointer("/error/message"))
        .and_then(Value::as_str)
        .map_or_else(|| body.to_string(), str::to_string);
    ClientError::Rejected {
        status,
        code,
        message,
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Result of a paid (or free-trial) call.
#[derive(Debug, Clone)]
pub struct PaidCallOutcome {
    /// The decoded response body.
    pub response: PaidCallResponse,
    /// Transaction id of the payment, when one was made.
    pub payment_txid: Option<String>,
}

/// Server acknowledgement of an invitation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteAck {
    /// Whether the invitation was accepted.
    pub accepted: bool,
    /// The responder's announcement, when provided.
    #[serde(default)]
    pub announcement: Option<Value>,
    /// Peers the responder now knows.
    #[serde(default)]
    pub peers_known: usize,
}

/// Options for [`NodeClient::paid_call`].
#[derive(Debug, Clone, Default)]
pub struct PaidCallOptions {
    /// Hard cap on provider price + protocol fee, in satoshis.
    pub max_sats: Option<u64>,
}

// ---------------------------------------------------------------------------
// NodeClient
// ---------------------------------------------------------------------------

/// HTTP client for talking to other claws.
#[derive(Clone)]
pub struct NodeClient {
    http: reqwest::Client,
    wallet: Arc<dyn WalletGateway>,
}

impl NodeClient {
    /// Construct over a shared reqwest client.
    #[must_use]
    pub fn new(http: reqwest::Client, wallet: Arc<dyn WalletGateway>) -> Self {
        Self { http, wallet }
    }

    /// Fetch a remote node's discovery manifest.
    ///
    /// # Errors
    ///
    /// Transport failures or a non-success status.
    pub async fn probe_discovery(&self, endpoint: &str) -> Result<DiscoveryManifest, ClientError> {
        let target = format!("{}/discovery", endpoint.trim_end_matches('/'));
        let response = self
            .http
            .get(&target)
            .timeout(DISCOVERY_TIMEOUT)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(rejection(status, &body));
        }
        response
            .json::<DiscoveryManifest>()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))
    }

    /// POST a signed invitation to a remote node.
    ///
    /// # Errors
    ///
    /// Transport failures or a non-success status.
    pub async fn send_invitation(
        &self,
        endpoint: &str,
        invitation: &Invitation,
    ) -> Result<InviteAck, ClientError> {
        let target = format!("{}/wallet/invite", endpoint.trim_end_matches('/'));
        let response = self
            .http
            .post(&target)
            .timeout(INVITE_TIMEOUT)
            .json(invitation)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(rejection(status.as_u16(), &body));
        }
        serde_json::from_str(&body).map_err(|e| ClientError::Decode(e.to_string()))
    }

    /// POST a signed announcement to a remote node.
    ///
    /// # Errors
    ///
    /// Transport failures or a non-success status.
    pub async fn send_announcement(
        &self,
        endpoint: &str,
        announcement: &claw_core::Announcement,
    ) -> Result<Value, ClientError> {
        let target = format!("{}/wallet/announce", endpoint.trim_end_matches('/'));
        let response = self
            .http
            .post(&target)
            .timeout(INVITE_TIMEOUT)
            .json(announcement)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(rejection(status.as_u16(), &body));
        }
        serde_json::from_str(&body).map_err(|e| ClientError::Decode(e.to_string()))
    }

    /// Call a remote capability, paying the 402 challenge when one comes
    /// back.
    ///
    /// The first POST goes out bare with this node's identity attached,
    /// which lets a previously unseen caller ride the provider's free
    /// trial. On a 402 the client checks the spend cap, builds a payment
    /// with the provider output at index 0 and the protocol fee output
    /// after it, and retries with the proof header.
    ///
    /// # Errors
    ///
    /// Transport, wallet, cap, or remote rejection failures.
    pub async fn paid_call(
        &self,
        endpoint: &str,
        capability: &str,
        params: &Value,
        opts: &PaidCallOptions,
    ) -> Result<PaidCallOutcome, ClientError> {
        let target = format!(
            "{}/call/{capability}",
            endpoint.trim_end_matches('/')
        );
        let own_identity = self.wallet.identity_key();

        let first = self
            .http
            .post(&target)
            .timeout(CALL_TIMEOUT)
            .header(headers::IDENTITY_KEY, own_identity.as_str())
            .json(params)
            .send()
            .await?;

        let status = first.status();
        if status.is_success() {
            let response = first
                .json::<PaidCallResponse>()
                .await
                .map_err(|e| ClientError::Decode(e.to_string()))?;
            debug!(capability, "call served without payment");
            return Ok(PaidCallOutcome {
                response,
                payment_txid: None,
            });
        }
        if status.as_u16() != 402 {
            let body = first.text().await.unwrap_or_default();
            return Err(rejection(status.as_u16(), &body));
        }

        // -- 402: read the challenge ------------------------------------
        let header = |name: &'static str| -> Result<String, ClientError> {
            first
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .ok_or(ClientError::MissingChallengeHeader(name))
        };
        let price: u64 = header(headers::SATOSHIS_REQUIRED)?
            .parse()
            .map_err(|_| ClientError::MissingChallengeHeader(headers::SATOSHIS_REQUIRED))?;
        let prefix = header(headers::DERIVATION_PREFIX)?;
        let provider_key = IdentityKey::parse(&header(headers::IDENTITY_KEY)?)
            .map_err(|e| ClientError::Decode(e.to_string()))?;
        let fee_sats: u64 = header(headers::FEE_SATOSHIS_REQUIRED)?
            .parse()
            .map_err(|_| ClientError::MissingChallengeHeader(headers::FEE_SATOSHIS_REQUIRED))?;
        let fee_suffix = header(headers::FEE_DERIVATION_SUFFIX)?;
        let fee_key = IdentityKey::parse(&header(headers::FEE_IDENTITY_KEY)?)
            .map_err(|e| ClientError::Decode(e.to_string()))?;

        let required = price + fee_sats;
        if let Some(cap) = opts.max_sats {
            if required > cap {
                return Err(ClientError::SpendCapExceeded { required, cap });
            }
        }

        // -- build and attach the payment -------------------------------
        let provider_script = self
            .wallet
            .derive_payment_script(&provider_key, &prefix, DEFAULT_DERIVATION_SUFFIX)
            .await?;
        let fee_script = self
            .wallet
            .derive_payment_script(&fee_key, &prefix, &fee_suffix)
            .await?;
        let broadcast = self
            .wallet
            .build_and_broadcast_payment(
                &[
                    PaymentOutput {
                        satoshis: price,
                        locking_script: provider_script,
                        note: format!("call {capability}"),
                    },
                    PaymentOutput {
                        satoshis: fee_sats,
                        locking_script: fee_script,
                        note: "clawsats protocol fee".into(),
                    },
                ],
                &format!("hire {capability} at {endpoint}"),
                &["clawsats".to_string(), "hire".to_string()],
            )
            .await?;

        let proof = PaymentProof {
            derivation_prefix: prefix,
            derivation_suffix: Some(DEFAULT_DERIVATION_SUFFIX.to_string()),
            transaction: BASE64.encode(&broadcast.raw_tx),
        };
        let proof_json =
            serde_json::to_string(&proof).map_err(|e| ClientError::Decode(e.to_string()))?;

        let second = self
            .http
            .post(&target)
            .timeout(CALL_TIMEOUT)
            .header(headers::IDENTITY_KEY, own_identity.as_str())
            .header(headers::PAYMENT, proof_json)
            .json(params)
            .send()
            .await?;

        let status = second.status();
        if !status.is_success() {
            let body = second.text().await.unwrap_or_default();
            warn!(capability, status = status.as_u16(), "paid call rejected after payment");
            return Err(rejection(status.as_u16(), &body));
        }
        let response = second
            .json::<PaidCallResponse>()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))?;
        Ok(PaidCallOutcome {
            response,
            payment_txid: Some(broadcast.txid),
        })
    }

    /// Register this node with a directory service.
    ///
    /// # Errors
    ///
    /// Transport failures or a non-success status.
    pub async fn register_with_directory(
        &self,
        url: &str,
        body: &Value,
    ) -> Result<(), ClientError> {
        let response = self
            .http
            .post(url)
            .timeout(DIRECTORY_TIMEOUT)
            .json(body)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(rejection(status, &text));
        }
        Ok(())
    }

    /// Fetch a directory listing and return its normalized public
    /// endpoints.
    ///
    /// # Errors
    ///
    /// Transport failures or an undecodable listing.
    pub async fn fetch_directory(&self, url: &str) -> Result<Vec<String>, ClientError> {
        #[derive(Deserialize)]
        struct Listing {
            #[serde(default)]
            claws: Vec<ListedClaw>,
        }
        #[derive(Deserialize)]
        struct ListedClaw {
            endpoint: Option<String>,
        }

        let response = self
            .http
            .get(url)
            .timeout(DIRECTORY_TIMEOUT)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(rejection(status, &text));
        }
        let listing = response
            .json::<Listing>()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))?;
        Ok(listing
            .claws
            .into_iter()
            .filter_map(|c| c.endpoint)
            .filter_map(|ep| normalize_endpoint(&ep))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_parses_coded_error_bodies() {
        let err = rejection(402, r#"{"error":{"code":"PAYMENT_REPLAY","message":"tx seen"}}"#);
        match err {
            ClientError::Rejected {
                status,
                code,
                message,
            } => {
                assert_eq!(status, 402);
                assert_eq!(code.as_deref(), Some("PAYMENT_REPLAY"));
                assert_eq!(message, "tx seen");
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn rejection_falls_back_to_raw_text() {
        let err = rejection(500, "boom");
        match err {
            ClientError::Rejected { code, message, .. } => {
                assert!(code.is_none());
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn spend_cap_error_reports_amounts() {
        let err = ClientError::SpendCapExceeded {
            required: 52,
            cap: 40,
        };
        assert_eq!(
            err.to_string(),
            "spend cap exceeded: call costs 52 sats, cap is 40"
        );
    }
}
