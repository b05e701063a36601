// SPDX-License-Identifier: MIT OR Apache-2.0
//! ClawSats — a peer-to-peer network of autonomous agents that discover
//! each other, hire each other to perform capabilities, and settle each
//! call with on-chain micropayments.
//!
//! This meta-crate re-exports the workspace members; depend on the
//! individual `claw-*` crates for narrower builds.
#![deny(unsafe_code)]

pub use claw_brain as brain;
pub use claw_capability as capability;
pub use claw_client as client;
pub use claw_config as config;
pub use claw_core as core;
pub use claw_daemon as daemon;
pub use claw_guard as guard;
pub use claw_peers as peers;
pub use claw_protocol as protocol;
pub use claw_wallet as wallet;
