// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared per-node state.
//!
//! Everything the request handlers and the discovery daemon touch hangs
//! off one `Arc<AppState>`: the wallet handle, peer table, capability
//! registry, job queue, replay guards, and the call-statistics and
//! referral ledgers. No module-global mutable state anywhere.

use claw_brain::{EventLog, JobStore, PolicyStore, TaskRouter};
use claw_capability::{CapabilityRegistry, HandlerContext};
use claw_client::NodeClient;
use claw_config::WalletConfig;
use claw_guard::{FifoSet, NonceCache, RateLimiter};
use claw_peers::PeerRegistry;
use claw_wallet::WalletGateway;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Capacity of the payment dedupe cache.
pub const PAYMENT_DEDUPE_CAPACITY: usize = 10_000;
/// Capacity of the free-trial set.
pub const FREE_TRIAL_CAPACITY: usize = 50_000;
/// Capacity of the unique-caller set.
pub const UNIQUE_CALLER_CAPACITY: usize = 50_000;
/// Invitations allowed per sender identity per hour.
pub const INVITES_PER_HOUR: u32 = 20;
/// Replay window for invitation nonces.
pub const INVITE_NONCE_TTL: Duration = Duration::from_secs(600);

/// Per-capability call counters and caller tracking.
#[derive(Default)]
pub struct CallStats {
    calls: Mutex<HashMap<String, u64>>,
}

impl CallStats {
    /// Bump the counter for `capability`.
    pub fn record(&self, capability: &str) {
        let mut calls = self.calls.lock().expect("call stats poisoned");
        *calls.entry(capability.to_string()).or_insert(0) += 1;
    }

    /// Snapshot of all counters.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, u64> {
        self.calls.lock().expect("call stats poisoned").clone()
    }
}

/// Referral relationships and the satoshi credits they earn.
///
/// An announcement relayed through `broadcast_listing` arrives tagged with
/// the relayer; every subsequent paid call from the referred identity
/// credits the introducer one satoshi.
#[derive(Default)]
pub struct ReferralLedger {
    referrers: Mutex<HashMap<String, String>>,
    credits: Mutex<HashMap<String, u64>>,
}

impl ReferralLedger {
    /// Record that `identity` was introduced by `referrer`. First
    /// introduction wins.
    pub fn record_referrer(&self, identity: &str, referrer: &str) {
        let mut referrers = self.referrers.lock().expect("referral map poisoned");
        referrers
            .entry(identity.to_string())
            .or_insert_with(|| referrer.to_string());
    }

    /// Credit the introducer of `identity` one satoshi, if there is one.
    pub fn credit_introducer(&self, identity: &str) {
        let referrer = {
            let referrers = self.referrers.lock().expect("referral map poisoned");
            referrers.get(identity).cloned()
        };
        if let Some(referrer) = referrer {
            let mut credits = self.credits.lock().expect("referral ledger poisoned");
            *credits.entry(referrer).or_insert(0) += 1;
        }
    }

    /// Snapshot of accumulated credits per introducer.
    #[must_use]
    pub fn credits(&self) -> HashMap<String, u64> {
        self.credits.lock().expect("referral ledger poisoned").clone()
    }
}

/// Process-wide node state shared by every handler and the daemon.
pub struct AppState {
    /// Node configuration (already env-resolved).
    pub config: WalletConfig,
    /// The wallet driver.
    pub wallet: Arc<dyn WalletGateway>,
    /// Peer registry.
    pub peers: Arc<PeerRegistry>,
    /// Capability registry, fully populated before bind.
    pub capabilities: Arc<CapabilityRegistry>,
    /// Brain job queue.
    pub jobs: Arc<JobStore>,
    /// Brain policy.
    pub policy: Arc<PolicyStore>,
    /// Event log.
    pub events: Arc<EventLog>,
    /// Outbound client (shared wallet).
    pub client: NodeClient,
    /// The task router.
    pub router: Arc<TaskRouter>,
    /// Invitation nonce replay guard.
    pub invite_nonces: NonceCache,
    /// Per-sender invitation rate limiter.
    pub invite_limiter: RateLimiter,
    /// Payment transaction dedupe cache.
    pub payment_dedupe: FifoSet,
    /// Identities that consumed their free trial.
    pub free_trials: FifoSet,
    /// Distinct callers seen.
    pub unique_callers: FifoSet,
    /// Per-capability call counters.
    pub stats: CallStats,
    /// Referral map and credit ledger.
    pub referrals: ReferralLedger,
    /// Relay dedupe set for `broadcast_listing`.
    pub relay_seen: FifoSet,
    /// Shared outbound HTTP client.
    pub http: reqwest::Client,
    /// Bearer key guarding the admin surface, when configured.
    pub api_key: Option<String>,
    /// Process start, for uptime reporting.
    pub started_at: Instant,
}

impl AppState {
    /// The handler context capabilities execute under.
    #[must_use]
    pub fn handler_context(&self) -> HandlerContext {
        HandlerContext {
            wallet: Arc::clone(&self.wallet),
            peers: Arc::clone(&self.peers),
            http: self.http.clone(),
            claw_id: self.config.claw_id.clone(),
            chain: self.config.chain.clone(),
            relay_seen: self.relay_seen.clone(),
        }
    }
}
