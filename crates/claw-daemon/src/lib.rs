// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! claw-daemon
#![deny(unsafe_code)]

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use claw_brain::{EventLog, FileMemoryWriter, JobStore, PolicyStore, TaskRouter};
use claw_capability::{CapabilityRegistry, register_builtins};
use claw_client::NodeClient;
use claw_config::{DataDirs, WalletConfig};
use claw_guard::{FifoSet, NonceCache, RateLimiter};
use claw_peers::PeerRegistry;
use claw_wallet::WalletGateway;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{info, warn};

/// Discovery daemon loop.
pub mod discovery;
/// The 402 payment dispatcher.
pub mod dispatch;
/// HTTP error envelope.
pub mod error;
/// Request middleware: ids, logging, auth, CORS.
pub mod middleware;
/// Public routes.
pub mod routes;
/// JSON-RPC admin surface.
pub mod rpc;
/// Shared node state.
pub mod state;

pub use discovery::DiscoveryDaemon;
pub use state::AppState;

use state::{
    CallStats, FREE_TRIAL_CAPACITY, INVITES_PER_HOUR, PAYMENT_DEDUPE_CAPACITY, ReferralLedger,
    UNIQUE_CALLER_CAPACITY,
};

/// Request body ceiling, bytes.
pub const BODY_LIMIT: usize = 64 * 1024;

/// Relay dedupe capacity for `broadcast_listing`.
const RELAY_SEEN_CAPACITY: usize = 10_000;

/// Build the Axum router with all node routes.
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/discovery", get(routes::discovery))
        .route("/wallet/invite", post(routes::wallet_invite))
        .route("/wallet/announce", post(routes::wallet_announce))
        .route("/wallet/submit-payment", post(routes::submit_payment))
        .route("/call/{cap}", post(dispatch::call_capability))
        .route("/", post(rpc::rpc))
        .layer(axum::middleware::from_fn_with_state(
            Arc::clone(&state),
            middleware::require_bearer,
        ))
        .layer(axum::middleware::from_fn(middleware::trace_requests))
        .layer(middleware::cors_layer())
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .with_state(state)
}

/// Generate a fresh admin bearer key (24 random bytes, base64url).
#[must_use]
pub fn generate_api_key() -> String {
    let bytes: [u8; 24] = rand::random();
    URL_SAFE_NO_PAD.encode(bytes)
}

fn is_loopback_host(host: &str) -> bool {
    matches!(host, "127.0.0.1" | "localhost" | "::1")
}

/// Assemble the full node state from configuration.
///
/// Verifies the fee constant, registers every built-in capability, loads
/// the persistent stores under `data_root`, and wires the task router.
///
/// # Errors
///
/// Fee-constant mismatch, wallet failures, or duplicate capability
/// registration.
pub fn build_state(
    mut config: WalletConfig,
    data_root: &Path,
    wallet: Arc<dyn WalletGateway>,
) -> Result<Arc<AppState>> {
    claw_core::verify_fee_constant().context("fee identity key failed its integrity check")?;

    let capabilities = Arc::new(CapabilityRegistry::new());
    register_builtins(&capabilities).context("registering built-in capabilities")?;
    config.identity_key = Some(wallet.identity_key());
    config.capabilities = capabilities.names();

    // A node bound beyond loopback must not run an open admin surface.
    let api_key = match (&config.api_key, is_loopback_host(&config.host)) {
        (Some(key), _) => Some(key.clone()),
        (None, true) => None,
        (None, false) => {
            let key = generate_api_key();
            // Logged exactly once; the operator copies it or configures
            // their own.
            warn!(api_key = %key, "no apiKey configured for a non-loopback bind; generated one");
            Some(key)
        }
    };

    let dirs = DataDirs::new(data_root);
    let peers = Arc::new(PeerRegistry::load(&dirs.peers_file()));
    let jobs = Arc::new(JobStore::load(&dirs.jobs_file()));
    let policy = Arc::new(PolicyStore::load(&dirs.policy_file()));
    let events = Arc::new(EventLog::at(&dirs.events_file()));
    let memory = Arc::new(FileMemoryWriter::at(&dirs.memory_index_file()));

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .context("building the outbound HTTP client")?;
    let client = NodeClient::new(http.clone(), Arc::clone(&wallet));

    let router = Arc::new(TaskRouter::new(
        Arc::clone(&jobs),
        Arc::clone(&policy),
        Arc::clone(&events),
        Arc::clone(&peers),
        client.clone(),
        memory,
        config.port,
    ));

    Ok(Arc::new(AppState {
        config,
        wallet,
        peers,
        capabilities,
        jobs,
        policy,
        events,
        client,
        router,
        invite_nonces: NonceCache::default(),
        invite_limiter: RateLimiter::new(INVITES_PER_HOUR, Duration::from_secs(3600)),
        payment_dedupe: FifoSet::new(PAYMENT_DEDUPE_CAPACITY),
        free_trials: FifoSet::new(FREE_TRIAL_CAPACITY),
        unique_callers: FifoSet::new(UNIQUE_CALLER_CAPACITY),
        stats: CallStats::default(),
        referrals: ReferralLedger::default(),
        relay_seen: FifoSet::new(RELAY_SEEN_CAPACITY),
        http,
        api_key,
        started_at: Instant::now(),
    }))
}

/// Bind, serve, and run the discovery daemon until shutdown.
///
/// # Errors
///
/// Bind or serve failures.
pub async fn serve(state: Arc<AppState>, seeds: Vec<String>) -> Result<()> {
    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(
        addr = %addr,
        identity = %state.wallet.identity_key().truncated(),
        capabilities = state.capabilities.len(),
        "claw listening"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Debounced peer persistence.
    tokio::spawn(PeerRegistry::run_flusher(Arc::clone(&state.peers)));

    // The discovery daemon.
    let daemon = DiscoveryDaemon::new(Arc::clone(&state), seeds, shutdown_rx.clone());
    let daemon_handle = tokio::spawn(daemon.run());

    let app = build_app(Arc::clone(&state));
    let mut shutdown_signal = shutdown_rx.clone();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = shutdown_signal.changed().await;
    });

    // Translate ctrl-c into the shared shutdown signal.
    let ctrl_c_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = ctrl_c_tx.send(true);
        }
    });

    server.await.context("server error")?;
    let _ = shutdown_tx.send(true);
    let _ = daemon_handle.await;

    // Final state flush; debounced writes may still be pending.
    if let Err(e) = state.peers.flush() {
        warn!(error = %e, "final peer flush failed");
    }
    info!("claw stopped");
    Ok(())
}
