// SPDX-License-Identifier: MIT OR Apache-2.0
//! Protocol constants, signing protocol identifiers, and the fee-key check.

use crate::canonical::sha256_hex;
use crate::error::CoreError;

/// Network protocol tag embedded in discovery manifests and beacons.
pub const PROTOCOL_TAG: &str = "clawsats";

/// Current protocol version string.
pub const PROTOCOL_VERSION: &str = "1.0";

/// A BRC-43 style signing protocol identifier: security level plus name.
pub type ProtocolId = (u8, &'static str);

/// Signing protocol for invitations, announcements, and discovery queries.
pub const SHARING_PROTOCOL: ProtocolId = (0, "clawsats sharing");

/// Key identifier used with [`SHARING_PROTOCOL`].
pub const SHARING_KEY_ID: &str = "sharing-v1";

/// Signing protocol for payment receipts.
pub const RECEIPT_PROTOCOL: ProtocolId = (0, "clawsats-receipt");

/// Key identifier used with [`RECEIPT_PROTOCOL`].
pub const RECEIPT_KEY_ID: &str = "receipt-v1";

/// Fixed protocol fee attached to every paid call, in satoshis.
pub const FEE_SATS: u64 = 2;

/// Identity key the protocol fee output must pay.
///
/// Forks that need a different fee key must bump [`PROTOCOL_VERSION`].
pub const FEE_IDENTITY_KEY: &str =
    "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";

/// SHA-256 of the ASCII hex form of [`FEE_IDENTITY_KEY`].
///
/// Verified at process startup; a mismatch aborts before the node binds.
pub const FEE_IDENTITY_KEY_SHA256: &str =
    "d13c888cfd35d6ab67dc3f67edcc401833e6ae4eec20b254b1981b187946ed91";

/// Key identifier advertised in fee challenge headers.
pub const FEE_KID: &str = "clawsats-fee-v1";

/// Derivation suffix for the protocol fee output.
pub const FEE_DERIVATION_SUFFIX: &str = "clawsats-fee";

/// Default derivation suffix for the provider payment output.
pub const DEFAULT_DERIVATION_SUFFIX: &str = "clawsats";

/// Beacon pushdata tag, first push after `OP_FALSE OP_RETURN`.
pub const BEACON_TAG: &str = "CLAWSATS_V1";

/// HTTP header names of the 402 payment protocol, shared by the server
/// dispatcher and the hiring client.
pub mod headers {
    /// Payment proof JSON (client → server).
    pub const PAYMENT: &str = "x-bsv-payment";
    /// Payment protocol version (server → client).
    pub const PAYMENT_VERSION: &str = "x-bsv-payment-version";
    /// Satoshis required for the provider output.
    pub const SATOSHIS_REQUIRED: &str = "x-bsv-payment-satoshis-required";
    /// Satoshis accepted on the paid response.
    pub const SATOSHIS_PAID: &str = "x-bsv-payment-satoshis-paid";
    /// Fresh derivation prefix for this challenge.
    pub const DERIVATION_PREFIX: &str = "x-bsv-payment-derivation-prefix";
    /// Identity key header: provider key on challenges, caller key on
    /// free-trial requests.
    pub const IDENTITY_KEY: &str = "x-bsv-identity-key";
    /// Satoshis required for the protocol fee output.
    pub const FEE_SATOSHIS_REQUIRED: &str = "x-clawsats-fee-satoshis-required";
    /// Fee key identifier.
    pub const FEE_KID: &str = "x-clawsats-fee-kid";
    /// Derivation suffix for the fee output.
    pub const FEE_DERIVATION_SUFFIX: &str = "x-clawsats-fee-derivation-suffix";
    /// Identity key the fee output derives to.
    pub const FEE_IDENTITY_KEY: &str = "x-clawsats-fee-identity-key";
}

/// Recompute the fee-key digest and compare with the embedded constant.
///
/// Binaries call this before doing anything else; a tampered fee key is a
/// non-starter, so startup must abort on mismatch.
///
/// # Errors
///
/// Returns [`CoreError::FeeConstantMismatch`] carrying both digests.
pub fn verify_fee_constant() -> Result<(), CoreError> {
    let computed = sha256_hex(FEE_IDENTITY_KEY.as_bytes());
    if computed != FEE_IDENTITY_KEY_SHA256 {
        return Err(CoreError::FeeConstantMismatch {
            expected: FEE_IDENTITY_KEY_SHA256.to_string(),
            computed,
        });
    }
    Ok(())
}
