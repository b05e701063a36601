// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! claw-core
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The stable contract for ClawSats.
//!
//! If you only take one dependency, take this one.

/// Canonical JSON serialization and hashing.
pub mod canonical;
/// Protocol constants, signing protocol identifiers, and the fee-key check.
pub mod constants;
/// Public-endpoint validation and normalization.
pub mod endpoint;
/// Client-visible error taxonomy with stable codes.
pub mod error;
/// Identity-key newtype (33-byte compressed public key, hex).
pub mod identity;
/// Signed wire artifacts: invitations, announcements, receipts, challenges.
pub mod records;

pub use canonical::{canonical_for_signing, canonical_json, canonical_sha256, sha256_hex};
pub use constants::{
    BEACON_TAG, DEFAULT_DERIVATION_SUFFIX, FEE_DERIVATION_SUFFIX, FEE_IDENTITY_KEY,
    FEE_IDENTITY_KEY_SHA256, FEE_KID, FEE_SATS, PROTOCOL_TAG, PROTOCOL_VERSION, ProtocolId,
    RECEIPT_KEY_ID, RECEIPT_PROTOCOL, SHARING_KEY_ID, SHARING_PROTOCOL, headers,
    verify_fee_constant,
};
pub use endpoint::{dns_hostname_allowed, normalize_endpoint, validate_public_endpoint};
pub use error::{ClawError, CoreError, ErrorCode};
pub use identity::IdentityKey;
pub use records::{
    AnnouncedCapability, Announcement, AnnouncementNetwork, CapabilityDescriptor,
    DiscoveryManifest, DiscoveryQuery, Invitation, InvitationParty, InvitationRecipient,
    PaidCallResponse, PaymentChallenge, PaymentProof, Receipt, WalletSnapshot,
};
