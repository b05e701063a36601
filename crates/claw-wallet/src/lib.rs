// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! claw-wallet
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// `OP_RETURN` beacon script construction.
pub mod beacon;
/// Reference in-process driver.
pub mod dev;
/// Defensive transaction-envelope parsing and the fee-output check.
pub mod envelope;
/// The narrow wallet contract the node core programs against.
pub mod gateway;

pub use beacon::{BeaconError, BeaconPayload, build_beacon_script};
pub use dev::{DevWallet, wire};
pub use envelope::{FeeCheck, TxLayout, TxOutput, TxParseError, fee_output_check, parse_tx_envelope};
pub use gateway::{
    ActionRecord, BroadcastResult, InternalizeResult, PaymentOutput, WalletError, WalletGateway,
};
