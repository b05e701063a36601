// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! claw-protocol
#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{Duration as ChronoDuration, Utc};
use claw_core::{
    Announcement, AnnouncementNetwork, AnnouncedCapability, DiscoveryQuery, ErrorCode, Invitation,
    InvitationParty, InvitationRecipient, SHARING_KEY_ID, SHARING_PROTOCOL, WalletSnapshot,
    canonical_for_signing,
};
use claw_wallet::{WalletError, WalletGateway, wire};
use serde::Serialize;
use uuid::Uuid;

/// Protocol tag carried by invitations.
pub const INVITE_PROTOCOL_TAG: &str = "clawsats-invite";

/// Type tag carried by announcements.
pub const ANNOUNCEMENT_TYPE: &str = "clawsats-announcement";

/// Type tag carried by discovery queries.
pub const QUERY_TYPE: &str = "clawsats-discovery-query";

/// Default invitation lifetime.
pub const DEFAULT_INVITATION_TTL_SECS: i64 = 300;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why an artifact was rejected.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// A structural field is missing or wrong.
    #[error("malformed artifact: {0}")]
    Malformed(String),

    /// The expiry timestamp is in the past.
    #[error("invitation expired")]
    Expired,

    /// The signature field is empty.
    #[error("unsigned artifact")]
    MissingSignature,

    /// The signature did not verify against the sender's identity.
    #[error("signature verification failed")]
    BadSignature,

    /// The wallet driver failed.
    #[error(transparent)]
    Wallet(#[from] WalletError),

    /// Canonicalization failed.
    #[error(transparent)]
    Core(#[from] claw_core::CoreError),
}

impl ProtocolError {
    /// The client-visible code for this rejection, when it has a stable
    /// one. Malformed artifacts and internal failures surface as plain
    /// 400/500 messages instead.
    #[must_use]
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            Self::Expired => Some(ErrorCode::InvitationExpired),
            Self::MissingSignature | Self::BadSignature => Some(ErrorCode::InvalidSignature),
            Self::Malformed(_) | Self::Wallet(_) | Self::Core(_) => None,
        }
    }
}

fn fresh_nonce() -> String {
    // 128 random bits, hex form.
    Uuid::new_v4().simple().to_string()
}

async fn sign_artifact<T: Serialize>(
    wallet: &dyn WalletGateway,
    artifact: &T,
    counterparty: Option<&claw_core::IdentityKey>,
) -> Result<String, ProtocolError> {
    let view = canonical_for_signing(artifact)?;
    let sig = wallet
        .sign(view.as_bytes(), SHARING_PROTOCOL, SHARING_KEY_ID, counterparty)
        .await?;
    Ok(wire::encode_signature(&sig))
}

async fn verify_artifact<T: Serialize>(
    wallet: &dyn WalletGateway,
    artifact: &T,
    signature_b64: &str,
    signer: &claw_core::IdentityKey,
) -> Result<(), ProtocolError> {
    if signature_b64.is_empty() {
        return Err(ProtocolError::MissingSignature);
    }
    let sig = wire::decode_signature(signature_b64)
        .ok_or_else(|| ProtocolError::Malformed("signature is not base64".into()))?;
    let view = canonical_for_signing(artifact)?;
    let ok = wallet
        .verify(view.as_bytes(), &sig, SHARING_PROTOCOL, SHARING_KEY_ID, signer)
        .await?;
    if ok { Ok(()) } else { Err(ProtocolError::BadSignature) }
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

/// Build and sign an invitation from `sender` to `recipient`.
///
/// # Errors
///
/// Wallet or canonicalization failures.
pub async fn create_invitation(
    wallet: &dyn WalletGateway,
    sender: InvitationParty,
    recipient: InvitationRecipient,
    snapshot: WalletSnapshot,
    ttl_secs: i64,
) -> Result<Invitation, ProtocolError> {
    let now = Utc::now();
    let mut invitation = Invitation {
        protocol: INVITE_PROTOCOL_TAG.to_string(),
        version: claw_core::PROTOCOL_VERSION.to_string(),
        invitation_id: Uuid::new_v4().to_string(),
        nonce: fresh_nonce(),
        sender,
        recipient,
        wallet: snapshot,
        expires_at: now + ChronoDuration::seconds(ttl_secs),
        created_at: now,
        signature: String::new(),
    };
    let counterparty = invitation.recipient.public_key.clone();
    invitation.signature = sign_artifact(wallet, &invitation, counterparty.as_ref()).await?;
    Ok(invitation)
}

/// Build and sign a capability announcement.
///
/// # Errors
///
/// Wallet or canonicalization failures.
pub async fn create_announcement(
    wallet: &dyn WalletGateway,
    claw_id: String,
    capabilities: Vec<AnnouncedCapability>,
    network: AnnouncementNetwork,
) -> Result<Announcement, ProtocolError> {
    let mut announcement = Announcement {
        type_tag: ANNOUNCEMENT_TYPE.to_string(),
        version: claw_core::PROTOCOL_VERSION.to_string(),
        announcement_id: Uuid::new_v4().to_string(),
        claw_id,
        identity_key: wallet.identity_key(),
        capabilities,
        network,
        referred_by: None,
        signature: String::new(),
    };
    announcement.signature = sign_artifact(wallet, &announcement, None).await?;
    Ok(announcement)
}

/// Build and sign a discovery query.
///
/// # Errors
///
/// Wallet or canonicalization failures.
pub async fn create_discovery_query(
    wallet: &dyn WalletGateway,
    claw_id: String,
    want: Vec<String>,
) -> Result<DiscoveryQuery, ProtocolError> {
    let mut query = DiscoveryQuery {
        type_tag: QUERY_TYPE.to_string(),
        version: claw_core::PROTOCOL_VERSION.to_string(),
        query_id: Uuid::new_v4().to_string(),
        claw_id,
        identity_key: wallet.identity_key(),
        want,
        created_at: Utc::now(),
        signature: String::new(),
    };
    query.signature = sign_artifact(wallet, &query, None).await?;
    Ok(query)
}

// ---------------------------------------------------------------------------
// Validation & verification
// ---------------------------------------------------------------------------

/// Structural checks on a received invitation: type tag, nonce, chain,
/// expiry. Signature and nonce-replay checks are separate.
///
/// # Errors
///
/// [`ProtocolError::Malformed`] or [`ProtocolError::Expired`].
pub fn validate_invitation(invitation: &Invitation) -> Result<(), ProtocolError> {
    if invitation.protocol != INVITE_PROTOCOL_TAG {
        return Err(ProtocolError::Malformed(format!(
            "unexpected protocol tag '{}'",
            invitation.protocol
        )));
    }
    if invitation.nonce.is_empty() {
        return Err(ProtocolError::Malformed("missing nonce".into()));
    }
    if invitation.wallet.chain.is_empty() {
        return Err(ProtocolError::Malformed("missing chain".into()));
    }
    if invitation.expires_at <= Utc::now() {
        return Err(ProtocolError::Expired);
    }
    Ok(())
}

/// Verify an invitation's signature against its sender.
///
/// # Errors
///
/// [`ProtocolError::MissingSignature`], [`ProtocolError::BadSignature`],
/// or wallet failures.
pub async fn verify_invitation_signature(
    wallet: &dyn WalletGateway,
    invitation: &Invitation,
) -> Result<(), ProtocolError> {
    verify_artifact(
        wallet,
        invitation,
        &invitation.signature.clone(),
        &invitation.sender.identity_key,
    )
    .await
}

/// Structural checks on a received announcement.
///
/// # Errors
///
/// [`ProtocolError::Malformed`] naming the failed field.
pub fn validate_announcement(announcement: &Announcement) -> Result<(), ProtocolError> {
    if announcement.type_tag != ANNOUNCEMENT_TYPE {
        return Err(ProtocolError::Malformed(format!(
            "unexpected type tag '{}'",
            announcement.type_tag
        )));
    }
    if announcement.announcement_id.is_empty() {
        return Err(ProtocolError::Malformed("missing announcement id".into()));
    }
    if announcement.network.chain.is_empty() {
        return Err(ProtocolError::Malformed("missing chain".into()));
    }
    Ok(())
}

/// Verify an announcement's signature against its announcer.
///
/// The `referredBy` tag is applied by relays *after* the announcer signed,
/// so it is stripped from the signing view alongside `signature`; a
/// relayed announcement verifies exactly like a direct one.
///
/// # Errors
///
/// [`ProtocolError::MissingSignature`], [`ProtocolError::BadSignature`],
/// or wallet failures.
pub async fn verify_announcement_signature(
    wallet: &dyn WalletGateway,
    announcement: &Announcement,
) -> Result<(), ProtocolError> {
    let mut unsigned = announcement.clone();
    unsigned.referred_by = None;
    verify_artifact(
        wallet,
        &unsigned,
        &announcement.signature.clone(),
        &announcement.identity_key,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use claw_wallet::DevWallet;

    fn party(wallet: &DevWallet) -> InvitationParty {
        InvitationParty {
            claw_id: "alpha".into(),
            identity_key: wallet.identity_key(),
            endpoint: Some("http://claw-a.example.com:3321".into()),
        }
    }

    fn snapshot() -> WalletSnapshot {
        WalletSnapshot {
            chain: "test".into(),
            capabilities: vec!["echo".into(), "dns_resolve".into()],
            deploy_hint: None,
        }
    }

    #[tokio::test]
    async fn invitation_round_trip_verifies() {
        let sender = DevWallet::generate();
        let receiver = DevWallet::generate();

        let invitation = create_invitation(
            &sender,
            party(&sender),
            InvitationRecipient {
                claw_id: "beta".into(),
                public_key: Some(receiver.identity_key()),
            },
            snapshot(),
            DEFAULT_INVITATION_TTL_SECS,
        )
        .await
        .unwrap();

        validate_invitation(&invitation).unwrap();
        verify_invitation_signature(&receiver, &invitation)
            .await
            .unwrap();
        assert_eq!(invitation.nonce.len(), 32);
    }

    #[tokio::test]
    async fn tampered_invitation_fails_verification() {
        let sender = DevWallet::generate();
        let receiver = DevWallet::generate();

        let mut invitation = create_invitation(
            &sender,
            party(&sender),
            InvitationRecipient {
                claw_id: "beta".into(),
                public_key: None,
            },
            snapshot(),
            DEFAULT_INVITATION_TTL_SECS,
        )
        .await
        .unwrap();

        invitation.sender.claw_id = "mallory".into();
        let err = verify_invitation_signature(&receiver, &invitation)
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::BadSignature));
    }

    #[tokio::test]
    async fn empty_signature_is_rejected_before_crypto() {
        let sender = DevWallet::generate();
        let mut invitation = create_invitation(
            &sender,
            party(&sender),
            InvitationRecipient {
                claw_id: "beta".into(),
                public_key: None,
            },
            snapshot(),
            DEFAULT_INVITATION_TTL_SECS,
        )
        .await
        .unwrap();
        invitation.signature.clear();
        let err = verify_invitation_signature(&sender, &invitation)
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::MissingSignature));
    }

    #[tokio::test]
    async fn expired_invitation_is_structurally_invalid() {
        let sender = DevWallet::generate();
        let invitation = create_invitation(
            &sender,
            party(&sender),
            InvitationRecipient {
                claw_id: "beta".into(),
                public_key: None,
            },
            snapshot(),
            -10,
        )
        .await
        .unwrap();
        let err = validate_invitation(&invitation).unwrap_err();
        assert!(matches!(err, ProtocolError::Expired));
        assert_eq!(err.error_code(), Some(ErrorCode::InvitationExpired));
    }

    #[tokio::test]
    async fn wrong_protocol_tag_is_malformed() {
        let sender = DevWallet::generate();
        let mut invitation = create_invitation(
            &sender,
            party(&sender),
            InvitationRecipient {
                claw_id: "beta".into(),
                public_key: None,
            },
            snapshot(),
            DEFAULT_INVITATION_TTL_SECS,
        )
        .await
        .unwrap();
        invitation.protocol = "clawsats-other".into();
        assert!(matches!(
            validate_invitation(&invitation),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn announcement_round_trip_verifies() {
        let announcer = DevWallet::generate();
        let verifier = DevWallet::generate();

        let announcement = create_announcement(
            &announcer,
            "alpha".into(),
            vec![AnnouncedCapability {
                name: "echo".into(),
                version: Some("1".into()),
                endpoint: Some("http://claw-a.example.com:3321/call/echo".into()),
                methods: vec!["POST".into()],
                rate_limit: Some(120),
                cost_per_call: Some(10),
            }],
            AnnouncementNetwork {
                chain: "test".into(),
                endpoint: Some("http://claw-a.example.com:3321".into()),
            },
        )
        .await
        .unwrap();

        validate_announcement(&announcement).unwrap();
        verify_announcement_signature(&verifier, &announcement)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn relayed_announcement_still_verifies_after_referred_by_tag() {
        // Relays tag referredBy after the announcer signed; the tag is
        // outside the signing view, so the original signature holds.
        let announcer = DevWallet::generate();
        let relay = DevWallet::generate();

        let mut announcement = create_announcement(
            &announcer,
            "alpha".into(),
            vec![],
            AnnouncementNetwork {
                chain: "test".into(),
                endpoint: None,
            },
        )
        .await
        .unwrap();
        announcement.referred_by = Some(relay.identity_key());
        verify_announcement_signature(&relay, &announcement)
            .await
            .unwrap();

        // A tampered body still fails.
        let mut bad = announcement.clone();
        bad.claw_id = "mallory".into();
        assert!(matches!(
            verify_announcement_signature(&relay, &bad).await.unwrap_err(),
            ProtocolError::BadSignature
        ));
    }

    #[tokio::test]
    async fn discovery_query_is_signed() {
        let wallet = DevWallet::generate();
        let query = create_discovery_query(&wallet, "alpha".into(), vec!["echo".into()])
            .await
            .unwrap();
        assert_eq!(query.type_tag, QUERY_TYPE);
        assert!(!query.signature.is_empty());
    }
}
