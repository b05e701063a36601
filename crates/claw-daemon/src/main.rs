// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
use anyhow::{Context, Result, bail};
use clap::Parser;
use claw_config::{ENV_ROOT_KEY, WalletConfig};
use claw_daemon::{build_state, serve};
use claw_wallet::DevWallet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "claw-daemon", version, about = "ClawSats node daemon")]
struct Args {
    /// Config file path; falls back to CLAWSATS_CONFIG_PATH, then
    /// config/wallet-config.json.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Root folder for mutable state (data/ lives under it).
    #[arg(long, default_value = ".")]
    data_root: PathBuf,

    /// Seed endpoints to probe on the first sweep.
    #[arg(long)]
    seed: Vec<String>,

    /// Enable request/response debug logging.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("claw=debug,claw_daemon=debug")
    } else {
        EnvFilter::new("claw=info,claw_daemon=info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let path = WalletConfig::resolve_path(args.config.as_deref());
    let config = match WalletConfig::load(&path) {
        Ok(config) => config,
        Err(claw_config::ConfigError::FileNotFound { .. }) => {
            let mut config = WalletConfig::default();
            config.apply_env();
            config
        }
        Err(e) => return Err(e).with_context(|| format!("loading {}", path.display())),
    };
    config.validate().context("invalid configuration")?;

    let Some(root_hex) = config.root_key_hex.clone() else {
        bail!("no root key material: set {ENV_ROOT_KEY} or rootKeyHex in the config");
    };
    let wallet = Arc::new(DevWallet::from_root_hex(&root_hex).context("constructing the wallet")?);

    let state = build_state(config, &args.data_root, wallet)?;
    serve(state, args.seed).await
}
