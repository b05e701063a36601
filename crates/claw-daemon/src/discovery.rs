// SPDX-License-Identifier: MIT OR Apache-2.0
//! The discovery daemon: one timer loop that registers with the
//! directory, probes seeds and known peers, auto-invites new claws, and
//! drives the brain's goal generation and sweep.
//!
//! Every step is fallible in isolation; a single bad peer or bad job
//! never aborts a sweep, and every failure lands in the event log.

use chrono::Utc;
use claw_brain::SweepOptions;
use claw_core::{InvitationParty, InvitationRecipient, WalletSnapshot, normalize_endpoint};
use claw_peers::PeerRecord;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::state::AppState;

/// Minimum spacing between directory listing fetches.
const DIRECTORY_FETCH_EVERY: Duration = Duration::from_secs(600);

/// Reputation granted to a peer first seen through discovery.
const DISCOVERED_PEER_REPUTATION: u8 = 30;

/// The periodic probe/auto-invite loop.
pub struct DiscoveryDaemon {
    state: Arc<AppState>,
    seeds: Vec<String>,
    shutdown: watch::Receiver<bool>,
    last_directory_register: Option<Instant>,
    last_directory_fetch: Option<Instant>,
}

impl DiscoveryDaemon {
    /// Build a daemon over the shared node state.
    #[must_use]
    pub fn new(state: Arc<AppState>, seeds: Vec<String>, shutdown: watch::Receiver<bool>) -> Self {
        let seeds = seeds
            .iter()
            .filter_map(|s| normalize_endpoint(s))
            .collect();
        Self {
            state,
            seeds,
            shutdown,
            last_directory_register: None,
            last_directory_fetch: None,
        }
    }

    /// Run sweeps on the policy interval until shutdown.
    pub async fn run(mut self) {
        loop {
            let interval = self
                .state
                .policy
                .get()
                .timers
                .discovery_interval_seconds
                .max(5);
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(interval)) => {
                    self.sweep_once().await;
                }
                _ = self.shutdown.changed() => {
                    info!("discovery daemon stopping");
                    if let Err(e) = self.state.peers.flush() {
                        warn!(error = %e, "final peer flush failed");
                    }
                    return;
                }
            }
        }
    }

    /// One full sweep. Public so operators can force a sweep through the
    /// CLI without waiting for the timer.
    pub async fn sweep_once(&mut self) {
        let policy = self.state.policy.get();

        // 1. Directory self-registration, throttled, skipped for
        //    local-only nodes.
        self.register_with_directory(policy.timers.directory_register_every_seconds)
            .await;

        // 2. Directory listing fetch, throttled.
        let mut endpoints: BTreeSet<String> = self.seeds.iter().cloned().collect();
        for ep in self.fetch_directory().await {
            endpoints.insert(ep);
        }

        // 3. Union with known-peer endpoints, then probe.
        for peer in self.state.peers.all() {
            if let Some(ep) = peer.endpoint.as_deref().and_then(normalize_endpoint) {
                endpoints.insert(ep);
            }
        }
        let own_key = self.state.wallet.identity_key();
        for endpoint in endpoints {
            match self.state.client.probe_discovery(&endpoint).await {
                Ok(manifest) => {
                    if manifest.identity_key == own_key {
                        continue;
                    }
                    let is_new = self.state.peers.get(&manifest.identity_key).is_none();
                    let mut record = PeerRecord::new(
                        manifest.identity_key.clone(),
                        manifest.claw_id.clone(),
                        manifest.chain.clone(),
                        DISCOVERED_PEER_REPUTATION,
                    );
                    record.endpoint = Some(endpoint.clone());
                    record.capabilities = manifest.capabilities.clone();
                    record.last_seen = Utc::now();
                    self.state.peers.add(record);

                    if is_new {
                        info!(peer = %manifest.identity_key.truncated(), endpoint = %endpoint, "peer discovered");
                        self.state.events.log(
                            "discovery",
                            "peer-discovered",
                            &format!("{} at {endpoint}", manifest.claw_id),
                            Some(json!({"identityKey": manifest.identity_key})),
                        );
                        if policy.timers.auto_invite_on_discovery {
                            self.auto_invite(&endpoint, &manifest.claw_id).await;
                        }
                    }
                }
                Err(e) => {
                    debug!(endpoint = %endpoint, error = %e, "discovery probe failed");
                    if let Some(peer) = self.state.peers.get_by_endpoint(&endpoint) {
                        self.state.peers.record_failure(&peer.identity_key);
                    }
                }
            }
        }

        // 4. Persist known peers.
        if let Err(e) = self.state.peers.flush() {
            warn!(error = %e, "peer flush failed");
        }

        // 5. Goal-template job generation.
        let generated = self.state.router.generate_goal_jobs();

        // 6. One bounded router sweep; memory writes still require
        //    approval.
        let report = self
            .state
            .router
            .run_sweep(SweepOptions {
                allow_memory_writes: false,
                limit: None,
            })
            .await;

        // 7. Sweep record.
        self.state.events.log(
            "discovery",
            "sweep-complete",
            &format!(
                "peers {} jobs {}/{} generated {generated}",
                self.state.peers.len(),
                report.completed,
                report.examined
            ),
            None,
        );
    }

    async fn register_with_directory(&mut self, every_seconds: u64) {
        let Some(register_url) = self.state.config.directory_register_url.clone() else {
            return;
        };
        // A node without a public endpoint has nothing to register.
        let Some(endpoint) = self
            .state
            .config
            .endpoint
            .as_deref()
            .and_then(normalize_endpoint)
        else {
            return;
        };
        let due = self
            .last_directory_register
            .is_none_or(|t| t.elapsed() >= Duration::from_secs(every_seconds));
        if !due {
            return;
        }
        self.last_directory_register = Some(Instant::now());
        let body = json!({
            "identityKey": self.state.wallet.identity_key(),
            "endpoint": endpoint,
            "capabilities": self.state.capabilities.names(),
        });
        match self
            .state
            .client
            .register_with_directory(&register_url, &body)
            .await
        {
            Ok(()) => debug!(url = %register_url, "directory registration ok"),
            Err(e) => warn!(url = %register_url, error = %e, "directory registration failed"),
        }
    }

    async fn fetch_directory(&mut self) -> Vec<String> {
        let Some(url) = self.state.config.directory_url.clone() else {
            return Vec::new();
        };
        let due = self
            .last_directory_fetch
            .is_none_or(|t| t.elapsed() >= DIRECTORY_FETCH_EVERY);
        if !due {
            return Vec::new();
        }
        self.last_directory_fetch = Some(Instant::now());
        match self.state.client.fetch_directory(&url).await {
            Ok(endpoints) => endpoints,
            Err(e) => {
                warn!(url = %url, error = %e, "directory fetch failed");
                Vec::new()
            }
        }
    }

    async fn auto_invite(&self, endpoint: &str, claw_id: &str) {
        let invitation = match claw_protocol::create_invitation(
            self.state.wallet.as_ref(),
            InvitationParty {
                claw_id: self.state.config.claw_id.clone(),
                identity_key: self.state.wallet.identity_key(),
                endpoint: self.state.config.endpoint.clone(),
            },
            InvitationRecipient {
                claw_id: claw_id.to_string(),
                public_key: self
                    .state
                    .peers
                    .get_by_endpoint(endpoint)
                    .map(|p| p.identity_key),
            },
            WalletSnapshot {
                chain: self.state.config.chain.clone(),
                capabilities: self.state.capabilities.names(),
                deploy_hint: None,
            },
            claw_protocol::DEFAULT_INVITATION_TTL_SECS,
        )
        .await
        {
            Ok(invitation) => invitation,
            Err(e) => {
                warn!(error = %e, "auto-invite construction failed");
                return;
            }
        };
        match self.state.client.send_invitation(endpoint, &invitation).await {
            Ok(ack) => {
                info!(endpoint, accepted = ack.accepted, "auto-invite sent");
                self.state.events.log(
                    "discovery",
                    "auto-invite",
                    &format!("invited {claw_id} at {endpoint}"),
                    None,
                );
            }
            Err(e) => warn!(endpoint, error = %e, "auto-invite failed"),
        }
    }
}
