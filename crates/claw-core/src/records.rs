// SPDX-License-Identifier: MIT OR Apache-2.0
//! Signed wire artifacts.
//!
//! Invitation / Announcement / DiscoveryQuery share a "signed artifact"
//! pattern: camelCase JSON on the wire, a base64 `signature` field, and a
//! signing view produced by [`crate::canonical_for_signing`]. They are
//! modelled as distinct records rather than a type hierarchy.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::canonical::canonical_sha256;
use crate::error::CoreError;
use crate::identity::IdentityKey;

// ---------------------------------------------------------------------------
// Invitation
// ---------------------------------------------------------------------------

/// The sending side of an invitation.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InvitationParty {
    /// Human-facing claw identifier.
    pub claw_id: String,
    /// Long-lived identity key of the sender.
    pub identity_key: IdentityKey,
    /// Public endpoint the sender can be reached at, when it has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

/// The receiving side of an invitation.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InvitationRecipient {
    /// Claw identifier the invitation is addressed to.
    pub claw_id: String,
    /// Recipient identity key, when the sender knows it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key: Option<IdentityKey>,
}

/// Snapshot of the sender's wallet configuration carried in an invitation.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WalletSnapshot {
    /// Chain tag (`main` / `test`).
    pub chain: String,
    /// Capability names the sender currently offers.
    pub capabilities: Vec<String>,
    /// Optional hint for deploying a compatible node.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deploy_hint: Option<String>,
}

/// A signed invitation to join the sender's peer set.
///
/// Created by the sender, signed over the canonical JSON of every field
/// except `signature`, then verified and either accepted (sender enters the
/// receiver's peer registry) or rejected (expired / replayed / malformed /
/// unsigned).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Invitation {
    /// Protocol tag, always `clawsats-invite`.
    pub protocol: String,
    /// Protocol version.
    pub version: String,
    /// Unique invitation id.
    pub invitation_id: String,
    /// Random 128-bit nonce, hex encoded. Replay-checked by the receiver.
    pub nonce: String,
    /// Who is inviting.
    pub sender: InvitationParty,
    /// Who is being invited.
    pub recipient: InvitationRecipient,
    /// Sender wallet snapshot.
    pub wallet: WalletSnapshot,
    /// Hard expiry; invitations are short-lived.
    pub expires_at: DateTime<Utc>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Base64 compact signature over the canonical signing view.
    pub signature: String,
}

// ---------------------------------------------------------------------------
// Announcement
// ---------------------------------------------------------------------------

/// One capability entry inside an [`Announcement`].
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnnouncedCapability {
    /// Capability name.
    pub name: String,
    /// Capability version tag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Endpoint the capability is served from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// HTTP methods accepted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<String>,
    /// Advertised rate limit, calls per hour.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<u32>,
    /// Advertised price per call in satoshis.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_per_call: Option<u64>,
}

/// Network block of an [`Announcement`].
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnnouncementNetwork {
    /// Chain tag the announcer settles on.
    pub chain: String,
    /// Public endpoint of the announcer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

/// A signed capability listing, either posted directly or relayed through
/// `broadcast_listing`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Announcement {
    /// Type tag, always `clawsats-announcement`.
    #[serde(rename = "type")]
    pub type_tag: String,
    /// Protocol version.
    pub version: String,
    /// Unique announcement id; part of the relay dedupe key.
    pub announcement_id: String,
    /// Claw identifier of the announcer.
    pub claw_id: String,
    /// Identity key of the announcer.
    pub identity_key: IdentityKey,
    /// Capabilities on offer.
    pub capabilities: Vec<AnnouncedCapability>,
    /// Network information.
    pub network: AnnouncementNetwork,
    /// Identity key of the relayer that forwarded this listing, if any.
    /// Paid calls from the announcer later credit this introducer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referred_by: Option<IdentityKey>,
    /// Base64 signature over the canonical signing view.
    pub signature: String,
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// A signed query for peers matching a capability filter.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryQuery {
    /// Type tag, always `clawsats-discovery-query`.
    #[serde(rename = "type")]
    pub type_tag: String,
    /// Protocol version.
    pub version: String,
    /// Unique query id.
    pub query_id: String,
    /// Claw identifier of the querier.
    pub claw_id: String,
    /// Identity key of the querier.
    pub identity_key: IdentityKey,
    /// Capability names the querier is looking for; empty means all.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub want: Vec<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Base64 signature over the canonical signing view.
    pub signature: String,
}

/// Priced capability descriptor as published in the discovery manifest.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityDescriptor {
    /// Capability name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Price per call in satoshis.
    pub price_sats: u64,
    /// Classification tags.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// The node manifest served at `GET /discovery`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryManifest {
    /// Protocol tag, always `clawsats`.
    pub protocol: String,
    /// Claw identifier of this node.
    pub claw_id: String,
    /// Identity key of this node.
    pub identity_key: IdentityKey,
    /// All capability names, free and paid.
    pub capabilities: Vec<String>,
    /// Paid capability descriptors.
    pub paid_capabilities: Vec<CapabilityDescriptor>,
    /// Route map (`invite`, `announce`, `call`, `health`).
    pub endpoints: BTreeMap<String, String>,
    /// Number of peers this node knows.
    pub peers_known: usize,
    /// Chain tag.
    pub chain: String,
    /// Manifest timestamp.
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Payment
// ---------------------------------------------------------------------------

/// The 402 challenge a provider issues for an unpaid call.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PaymentChallenge {
    /// Payment protocol version.
    pub version: String,
    /// Satoshis the provider output must carry.
    pub satoshis_required: u64,
    /// Fresh random derivation prefix, base64. One per challenge.
    pub derivation_prefix: String,
    /// Provider identity key the payment derives to.
    pub provider_identity_key: IdentityKey,
    /// Satoshis the protocol fee output must carry.
    pub fee_satoshis_required: u64,
    /// Fee key identifier.
    pub fee_kid: String,
    /// Derivation suffix for the fee output.
    pub fee_derivation_suffix: String,
    /// Identity key the fee output derives to.
    pub fee_identity_key: IdentityKey,
}

/// The payment proof a client attaches in the `x-bsv-payment` header.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PaymentProof {
    /// Derivation prefix echoed from the challenge.
    pub derivation_prefix: String,
    /// Derivation suffix chosen by the client; defaults to `clawsats`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub derivation_suffix: Option<String>,
    /// Raw transaction bytes, base64. Consumed exactly once per call.
    pub transaction: String,
}

/// A signed statement that a specific paid call happened and produced a
/// result with a given hash.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    /// Unique receipt id.
    pub receipt_id: String,
    /// Capability that was executed.
    pub capability: String,
    /// Provider identity key (the signer).
    pub provider: IdentityKey,
    /// Requester identity key, when the caller identified itself.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requester: Option<IdentityKey>,
    /// Satoshis paid to the provider output.
    pub satoshis_paid: u64,
    /// Satoshis paid to the protocol fee output.
    pub fee_satoshis: u64,
    /// Hex SHA-256 of the canonical JSON of the capability result.
    pub result_sha256: String,
    /// Issue timestamp.
    pub timestamp: DateTime<Utc>,
    /// Base64 signature over the canonical signing view.
    pub signature: String,
}

impl Receipt {
    /// Assemble an unsigned receipt for `result`, computing its canonical
    /// hash. The caller signs the canonical signing view and fills in
    /// `signature`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Json`] if the result cannot be canonicalized.
    pub fn unsigned(
        receipt_id: String,
        capability: String,
        provider: IdentityKey,
        requester: Option<IdentityKey>,
        satoshis_paid: u64,
        fee_satoshis: u64,
        result: &Value,
    ) -> Result<Self, CoreError> {
        Ok(Self {
            receipt_id,
            capability,
            provider,
            requester,
            satoshis_paid,
            fee_satoshis,
            result_sha256: canonical_sha256(result)?,
            timestamp: Utc::now(),
            signature: String::new(),
        })
    }
}

/// Response body of a successful `/call/:cap`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PaidCallResponse {
    /// Capability result value.
    pub result: Value,
    /// Satoshis the provider accepted; zero on the free-trial path.
    pub satoshis_paid: u64,
    /// Signed receipt; present on the paid path only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt: Option<Receipt>,
    /// Set when the call consumed the caller's one free trial.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub free_trial: Option<bool>,
}
