// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use claw_brain::{EventLog, JobInput, JobStatus, JobStore, PolicyStore};
use claw_client::NodeClient;
use claw_config::{DataDirs, WalletConfig};
use claw_core::{InvitationParty, InvitationRecipient, WalletSnapshot};
use claw_wallet::{DevWallet, WalletGateway};
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "claw", version, about = "ClawSats node operator CLI")]
struct Cli {
    /// Config file path; falls back to CLAWSATS_CONFIG_PATH, then
    /// config/wallet-config.json.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Root folder for mutable state (data/ lives under it).
    #[arg(long, global = true, default_value = ".")]
    data_root: PathBuf,

    /// Verbose logging.
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a fresh root key and node config.
    Create {
        /// Claw identifier.
        #[arg(long, default_value = "claw")]
        claw_id: String,
        /// Chain tag.
        #[arg(long, default_value = "test")]
        chain: String,
        /// Public endpoint to advertise.
        #[arg(long)]
        endpoint: Option<String>,
    },
    /// Run the node daemon.
    Serve {
        /// Seed endpoints to probe on the first sweep.
        #[arg(long)]
        seed: Vec<String>,
    },
    /// Build a signed invitation; print it or send it to a peer.
    Share {
        /// Destination endpoint; omit to print the invitation JSON.
        #[arg(long)]
        to: Option<String>,
    },
    /// Probe a node's health endpoint.
    Health {
        /// Target; defaults to the local node.
        #[arg(long)]
        endpoint: Option<String>,
    },
    /// Fetch a node's discovery manifest.
    Discover {
        /// Target endpoint.
        #[arg(long)]
        endpoint: String,
    },
    /// Send this node's announcement to a peer.
    Announce {
        /// Destination endpoint.
        #[arg(long)]
        to: String,
    },
    /// Show recent paid-call earnings from the event log.
    Earn {
        /// How many events to show.
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Probe the peers on the watch list.
    Watch {
        /// Add an endpoint to the watch list first.
        #[arg(long)]
        add: Option<String>,
    },
    /// Print the redacted node configuration.
    Config,
    /// Autonomous brain operations.
    Brain {
        #[command(subcommand)]
        command: BrainCommand,
    },
}

#[derive(Subcommand, Debug)]
enum BrainCommand {
    /// Queue counters and policy summary.
    Status,
    /// Jobs the next sweep would pick up.
    WhatNext,
    /// Show a job's audit trail.
    Why {
        /// Job id.
        job_id: String,
    },
    /// Show the effective policy, or merge updates into it.
    Policy {
        /// JSON object deep-merged over the current policy and saved.
        #[arg(long)]
        set: Option<String>,
    },
    /// Enqueue a job.
    Enqueue {
        /// Capability name.
        #[arg(long)]
        capability: String,
        /// Params JSON.
        #[arg(long, default_value = "{}")]
        params: String,
        /// Spend cap in satoshis.
        #[arg(long)]
        max_sats: Option<u64>,
        /// Priority (lower runs first).
        #[arg(long)]
        priority: Option<i64>,
        /// Persist the result to on-chain memory.
        #[arg(long)]
        persist_result: bool,
        /// Memory key for persistence.
        #[arg(long)]
        memory_key: Option<String>,
    },
    /// List jobs, optionally by status.
    Jobs {
        /// pending | running | completed | failed | needs_approval
        #[arg(long)]
        status: Option<String>,
    },
    /// Requeue failed jobs.
    RetryFailed,
    /// Generate goal jobs and run one sweep.
    Run {
        /// Approve pending memory writes this sweep.
        #[arg(long)]
        allow_memory_writes: bool,
        /// Jobs to execute this sweep.
        #[arg(long)]
        limit: Option<usize>,
    },
}

fn load_config(cli: &Cli) -> Result<WalletConfig> {
    let path = WalletConfig::resolve_path(cli.config.as_deref());
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
    Ok(config)
}

fn wallet_from(config: &WalletConfig) -> Result<Arc<DevWallet>> {
    let Some(root_hex) = &config.root_key_hex else {
        bail!("no root key material; run `claw create` or set CLAWSATS_ROOT_KEY_HEX");
    };
    Ok(Arc::new(
        DevWallet::from_root_hex(root_hex).context("constructing the wallet")?,
    ))
}

fn client_from(config: &WalletConfig) -> Result<NodeClient> {
    let wallet = wallet_from(config)?;
    Ok(NodeClient::new(reqwest::Client::new(), wallet))
}

fn local_endpoint(config: &WalletConfig) -> String {
    format!("http://127.0.0.1:{}", config.port)
}

fn print_json(value: &Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let filter = if cli.verbose {
        EnvFilter::new("claw=debug")
    } else {
        EnvFilter::new("claw=warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match &cli.command {
        Command::Create {
            claw_id,
            chain,
            endpoint,
        } => create(&cli, claw_id, chain, endpoint.as_deref()),
        Command::Serve { seed } => {
            let config = load_config(&cli)?;
            let wallet = wallet_from(&config)?;
            let state = claw_daemon::build_state(config, &cli.data_root, wallet)?;
            claw_daemon::serve(state, seed.clone()).await
        }
        Command::Share { to } => share(&cli, to.as_deref()).await,
        Command::Health { endpoint } => health(&cli, endpoint.as_deref()).await,
        Command::Discover { endpoint } => discover(&cli, endpoint).await,
        Command::Announce { to } => announce(&cli, to).await,
        Command::Earn { limit } => earn(&cli, *limit),
        Command::Watch { add } => watch(&cli, add.as_deref()).await,
        Command::Config => {
            let config = load_config(&cli)?;
            print_json(&config.redacted());
            Ok(())
        }
        Command::Brain { command } => brain(&cli, command).await,
    }
}

fn create(cli: &Cli, claw_id: &str, chain: &str, endpoint: Option<&str>) -> Result<()> {
    let path = WalletConfig::resolve_path(cli.config.as_deref());
    if path.exists() {
        bail!("config already exists at {}", path.display());
    }
    let wallet = DevWallet::generate();
    let mut config = WalletConfig::default();
    config.claw_id = claw_id.to_string();
    config.chain = chain.to_string();
    config.endpoint = endpoint.map(str::to_string);
    config.root_key_hex = Some(wallet.root_hex());
    config.identity_key = Some(wallet.identity_key());
    config.validate().context("invalid configuration")?;
    config.save(&path)?;
    println!("created {}", path.display());
    println!("identity: {}", wallet.identity_key());
    Ok(())
}

async fn share(cli: &Cli, to: Option<&str>) -> Result<()> {
    let config = load_config(cli)?;
    let wallet = wallet_from(&config)?;
    let invitation = claw_protocol::create_invitation(
        wallet.as_ref(),
        InvitationParty {
            claw_id: config.claw_id.clone(),
            identity_key: wallet.identity_key(),
            endpoint: config.endpoint.clone(),
        },
        InvitationRecipient {
            claw_id: "unknown".into(),
            public_key: None,
        },
        WalletSnapshot {
            chain: config.chain.clone(),
            capabilities: config.capabilities.clone(),
            deploy_hint: None,
        },
        claw_protocol::DEFAULT_INVITATION_TTL_SECS,
    )
    .await?;

    match to {
        Some(endpoint) => {
            let client = NodeClient::new(reqwest::Client::new(), wallet);
            let ack = client.send_invitation(endpoint, &invitation).await?;
            println!(
                "invitation {} — accepted: {}, peers known there: {}",
                invitation.invitation_id, ack.accepted, ack.peers_known
            );
        }
        None => print_json(&serde_json::to_value(&invitation)?),
    }
    Ok(())
}

async fn health(cli: &Cli, endpoint: Option<&str>) -> Result<()> {
    let config = load_config(cli)?;
    let target = endpoint
        .map(str::to_string)
        .unwrap_or_else(|| local_endpoint(&config));
    let url = format!("{}/health", target.trim_end_matches('/'));
    let body: Value = reqwest::get(&url).await?.json().await?;
    print_json(&body);
    Ok(())
}

async fn discover(cli: &Cli, endpoint: &str) -> Result<()> {
    let config = load_config(cli)?;
    let client = client_from(&config)?;
    let manifest = client.probe_discovery(endpoint).await?;
    print_json(&serde_json::to_value(&manifest)?);
    Ok(())
}

async fn announce(cli: &Cli, to: &str) -> Result<()> {
    let config = load_config(cli)?;
    let wallet = wallet_from(&config)?;
    let announcement = claw_protocol::create_announcement(
        wallet.as_ref(),
        config.claw_id.clone(),
        Vec::new(),
        claw_core::AnnouncementNetwork {
            chain: config.chain.clone(),
            endpoint: config.endpoint.clone(),
        },
    )
    .await?;
    let client = NodeClient::new(reqwest::Client::new(), wallet);
    let ack = client.send_announcement(to, &announcement).await?;
    print_json(&ack);
    Ok(())
}

fn earn(cli: &Cli, limit: usize) -> Result<()> {
    let dirs = DataDirs::new(&cli.data_root);
    let events = EventLog::at(&dirs.events_file());
    let paid = events.list(limit, Some("paid-call"));
    if paid.is_empty() {
        println!("no paid calls recorded yet");
        return Ok(());
    }
    for event in paid {
        println!("{}  {}", event.ts.to_rfc3339(), event.reason);
    }
    Ok(())
}

async fn watch(cli: &Cli, add: Option<&str>) -> Result<()> {
    let config = load_config(cli)?;
    let dirs = DataDirs::new(&cli.data_root);
    let path = dirs.watch_peers_file();
    let mut watched: Vec<String> = std::fs::read(&path)
        .ok()
        .and_then(|bytes| serde_json::from_slice(&bytes).ok())
        .unwrap_or_default();

    if let Some(endpoint) = add {
        let normalized = claw_core::normalize_endpoint(endpoint)
            .with_context(|| format!("'{endpoint}' is not a public http(s) URL"))?;
        if !watched.contains(&normalized) {
            watched.push(normalized);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, serde_json::to_vec_pretty(&watched)?)?;
        }
    }

    if watched.is_empty() {
        println!("watch list is empty; add one with --add <endpoint>");
        return Ok(());
    }
    let client = client_from(&config)?;
    for endpoint in &watched {
        match client.probe_discovery(endpoint).await {
            Ok(manifest) => println!(
                "{endpoint}  up  {} ({} capabilities)",
                manifest.claw_id,
                manifest.capabilities.len()
            ),
            Err(e) => println!("{endpoint}  down  {e}"),
        }
    }
    Ok(())
}

async fn brain(cli: &Cli, command: &BrainCommand) -> Result<()> {
    let config = load_config(cli)?;
    let dirs = DataDirs::new(&cli.data_root);
    let jobs = JobStore::load(&dirs.jobs_file());
    let policy = PolicyStore::load(&dirs.policy_file());

    match command {
        BrainCommand::Status => {
            let all = jobs.list(None);
            let count = |s: JobStatus| all.iter().filter(|j| j.status == s).count();
            print_json(&json!({
                "jobs": {
                    "total": all.len(),
                    "pending": count(JobStatus::Pending),
                    "running": count(JobStatus::Running),
                    "completed": count(JobStatus::Completed),
                    "failed": count(JobStatus::Failed),
                    "needsApproval": count(JobStatus::NeedsApproval),
                },
                "policy": {
                    "hireEnabled": policy.get().decisions.hire_enabled,
                    "maxJobsPerSweep": policy.get().decisions.max_jobs_per_sweep,
                    "autoGenerateJobs": policy.get().goals.auto_generate_jobs,
                },
            }));
        }
        BrainCommand::WhatNext => {
            let next = jobs.next_pending(policy.get().decisions.max_jobs_per_sweep);
            if next.is_empty() {
                println!("nothing queued");
            }
            for job in next {
                println!(
                    "{}  {}  {}  max {} sats",
                    job.id,
                    job.status.as_str(),
                    job.capability,
                    job.max_sats
                );
            }
        }
        BrainCommand::Why { job_id } => {
            let Some(job) = jobs.get(job_id) else {
                bail!("no job {job_id}");
            };
            println!("{} — {} ({})", job.id, job.capability, job.status.as_str());
            for entry in &job.audit {
                println!("  {}  {}  {}", entry.ts.to_rfc3339(), entry.action, entry.reason);
            }
            if let Some(error) = &job.error {
                println!("error: {error}");
            }
        }
        BrainCommand::Policy { set } => {
            if let Some(overlay) = set {
                let overlay: Value =
                    serde_json::from_str(overlay).context("--set must be a JSON object")?;
                if !overlay.is_object() {
                    bail!("--set must be a JSON object");
                }
                let mut merged = serde_json::to_value(policy.get())?;
                claw_brain::deep_merge(&mut merged, overlay);
                let updated: claw_brain::BrainPolicy = serde_json::from_value(merged)
                    .context("merged policy does not fit the policy schema")?;
                policy.set(updated)?;
            }
            print_json(&serde_json::to_value(policy.get())?);
        }
        BrainCommand::Enqueue {
            capability,
            params,
            max_sats,
            priority,
            persist_result,
            memory_key,
        } => {
            let params: Value =
                serde_json::from_str(params).context("--params must be a JSON object")?;
            let input = JobInput {
                capability: capability.clone(),
                params,
                max_sats: *max_sats,
                priority: *priority,
                persist_result: *persist_result,
                memory_key: memory_key.clone(),
                ..JobInput::default()
            };
            let job = jobs.enqueue(input, policy.get().decisions.auto_hire_max_sats)?;
            println!("enqueued {}", job.id);
        }
        BrainCommand::Jobs { status } => {
            let filter = match status.as_deref() {
                Some(s) => Some(
                    serde_json::from_value::<JobStatus>(json!(s))
                        .map_err(|_| anyhow::anyhow!("unknown status '{s}'"))?,
                ),
                None => None,
            };
            for job in jobs.list(filter) {
                println!(
                    "{}  {}  {}  attempts {}",
                    job.id,
                    job.status.as_str(),
                    job.capability,
                    job.attempts
                );
            }
        }
        BrainCommand::RetryFailed => {
            println!("requeued {}", jobs.retry_failed()?);
        }
        BrainCommand::Run {
            allow_memory_writes,
            limit,
        } => {
            let wallet = wallet_from(&config)?;
            let state = claw_daemon::build_state(config, &cli.data_root, wallet)?;
            let generated = state.router.generate_goal_jobs();
            let report = state
                .router
                .run_sweep(claw_brain::SweepOptions {
                    allow_memory_writes: *allow_memory_writes,
                    limit: *limit,
                })
                .await;
            print_json(&json!({
                "goalsGenerated": generated,
                "examined": report.examined,
                "completed": report.completed,
                "failed": report.failed,
                "awaitingApproval": report.awaiting_approval,
            }));
        }
    }
    Ok(())
}
