// SPDX-License-Identifier: MIT OR Apache-2.0
//! The narrow wallet contract the node core programs against.
//!
//! Every caller in the node — dispatcher, protocol, client, capabilities —
//! takes an `Arc<dyn WalletGateway>` and never sees the underlying wallet
//! library. One adapter wraps the native library per deployment;
//! [`crate::DevWallet`] is the in-process reference.

use async_trait::async_trait;
use claw_core::{IdentityKey, ProtocolId};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors surfaced by a wallet driver.
#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    /// The driver failed to produce a signature.
    #[error("signing failed: {0}")]
    Signing(String),

    /// Signature verification could not be performed (malformed inputs).
    ///
    /// A well-formed signature that simply does not match returns
    /// `Ok(false)` from [`WalletGateway::verify`], not this error.
    #[error("verification failed: {0}")]
    Verification(String),

    /// Payment-script derivation failed.
    #[error("derivation failed: {0}")]
    Derivation(String),

    /// The driver could not build or broadcast the payment transaction.
    #[error("broadcast failed: {0}")]
    Broadcast(String),

    /// The transaction output did not decrypt to a valid payment for this
    /// wallet.
    #[error("internalize rejected: {reason}")]
    Internalize {
        /// Driver-supplied rejection detail, surfaced to the payer.
        reason: String,
    },

    /// The wallet RPC exceeded its deadline.
    #[error("wallet call timed out after {seconds}s")]
    Timeout {
        /// Deadline that was exceeded.
        seconds: u64,
    },
}

// ---------------------------------------------------------------------------
// Value types
// ---------------------------------------------------------------------------

/// One output of a payment under construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentOutput {
    /// Amount in satoshis.
    pub satoshis: u64,
    /// Locking script bytes.
    pub locking_script: Vec<u8>,
    /// Free-form note carried into the wallet's action log.
    pub note: String,
}

/// Result of building and broadcasting a payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastResult {
    /// Raw transaction bytes.
    pub raw_tx: Vec<u8>,
    /// Hex transaction id.
    pub txid: String,
}

/// Result of internalizing an incoming payment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct InternalizeResult {
    /// Satoshis the wallet accepted from the matched output.
    pub accepted_sats: u64,
}

/// An entry in the wallet's action log, for operator introspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    /// Hex transaction id.
    pub txid: String,
    /// Human description supplied when the action was created.
    pub description: String,
    /// Labels attached to the action.
    pub labels: Vec<String>,
    /// Total satoshis across the action's outputs.
    pub satoshis: u64,
    /// Unix seconds when the action was recorded.
    pub created_at: u64,
}

// ---------------------------------------------------------------------------
// WalletGateway
// ---------------------------------------------------------------------------

/// The only wallet interface the node core needs.
///
/// Methods take a signing protocol identifier and key id in the BRC-43
/// style; how the driver derives invocation keys from them is
/// driver-internal, but sign/verify and derive/internalize must be
/// symmetric across any two drivers of the same scheme.
#[async_trait]
pub trait WalletGateway: Send + Sync {
    /// This wallet's long-lived identity key.
    fn identity_key(&self) -> IdentityKey;

    /// Sign `data` under `(protocol_id, key_id)`, optionally bound to a
    /// counterparty. Returns raw signature bytes.
    async fn sign(
        &self,
        data: &[u8],
        protocol_id: ProtocolId,
        key_id: &str,
        counterparty: Option<&IdentityKey>,
    ) -> Result<Vec<u8>, WalletError>;

    /// Verify `signature` over `data` as produced by `counterparty` under
    /// `(protocol_id, key_id)`.
    async fn verify(
        &self,
        data: &[u8],
        signature: &[u8],
        protocol_id: ProtocolId,
        key_id: &str,
        counterparty: &IdentityKey,
    ) -> Result<bool, WalletError>;

    /// Derive the locking script paying `recipient` under the given
    /// per-payment derivation salts.
    async fn derive_payment_script(
        &self,
        recipient: &IdentityKey,
        derivation_prefix: &str,
        derivation_suffix: &str,
    ) -> Result<Vec<u8>, WalletError>;

    /// Build, sign, and broadcast a payment with the given outputs.
    async fn build_and_broadcast_payment(
        &self,
        outputs: &[PaymentOutput],
        description: &str,
        labels: &[String],
    ) -> Result<BroadcastResult, WalletError>;

    /// Accept an incoming payment: check that `raw_tx`'s output at
    /// `output_index` decrypts to a valid payment for this wallet under
    /// the given salts and sender.
    ///
    /// Drivers must report `accepted_sats` whenever the underlying wallet
    /// exposes it; a driver that cannot must guarantee rejection on amount
    /// mismatch, in which case callers treat the accepted amount as equal
    /// to the requested amount.
    async fn internalize_payment(
        &self,
        raw_tx: &[u8],
        output_index: u32,
        derivation_prefix: &str,
        derivation_suffix: &str,
        sender: &IdentityKey,
        description: &str,
    ) -> Result<InternalizeResult, WalletError>;

    /// Recent wallet actions, newest last. Optional introspection for the
    /// operator RPC surface; drivers without an action log return empty.
    fn list_actions(&self) -> Vec<ActionRecord> {
        Vec::new()
    }
}
