// SPDX-License-Identifier: MIT OR Apache-2.0
//! Policy loading, deep-merging, and persistence.
//!
//! The policy file is overlaid onto the built-in default: object-valued
//! keys recurse, scalars and arrays overwrite. Unset keys therefore keep
//! their defaults across upgrades that add new knobs.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

use crate::jobs::JobStrategy;

/// Timer knobs for the background loops.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct TimersPolicy {
    /// Seconds between discovery sweeps.
    pub discovery_interval_seconds: u64,
    /// Seconds between directory self-registrations.
    pub directory_register_every_seconds: u64,
    /// Send an invitation when discovery meets a new peer.
    pub auto_invite_on_discovery: bool,
}

impl Default for TimersPolicy {
    fn default() -> Self {
        Self {
            discovery_interval_seconds: 300,
            directory_register_every_seconds: 3600,
            auto_invite_on_discovery: true,
        }
    }
}

/// Decision gates for autonomous execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct DecisionsPolicy {
    /// Whether hiring remote peers is allowed at all.
    pub hire_enabled: bool,
    /// Default spend cap per auto-generated job, satoshis.
    pub auto_hire_max_sats: u64,
    /// Whether results may be persisted to on-chain memory.
    pub write_memory_enabled: bool,
    /// Memory writes park in `needs_approval` until a human allows them.
    pub require_human_approval_for_memory: bool,
    /// Capabilities eligible for auto-hire; empty means all.
    pub auto_hire_capabilities: Vec<String>,
    /// Jobs executed per sweep.
    pub max_jobs_per_sweep: usize,
}

impl Default for DecisionsPolicy {
    fn default() -> Self {
        Self {
            hire_enabled: true,
            auto_hire_max_sats: 100,
            write_memory_enabled: false,
            require_human_approval_for_memory: true,
            auto_hire_capabilities: Vec::new(),
            max_jobs_per_sweep: 3,
        }
    }
}

/// Network-growth targets for discovery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct GrowthPolicy {
    /// Below this many healthy peers the daemon probes aggressively.
    pub min_healthy_peers: usize,
    /// Peer-count target the daemon grows toward.
    pub target_known_peers: usize,
}

impl Default for GrowthPolicy {
    fn default() -> Self {
        Self {
            min_healthy_peers: 3,
            target_known_peers: 25,
        }
    }
}

/// One goal template the brain turns into jobs on a cooldown.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct GoalTemplate {
    /// Capability to enqueue.
    pub capability: String,
    /// Params for the job.
    pub params: Value,
    /// Disabled templates are skipped; unset means enabled.
    pub enabled: Option<bool>,
    /// Cooldown between generated jobs, seconds.
    pub every_seconds: Option<u64>,
    /// Strategy override.
    pub strategy: Option<JobStrategy>,
    /// Spend-cap override.
    pub max_sats: Option<u64>,
    /// Priority override.
    pub priority: Option<i64>,
    /// Persist results to memory.
    pub persist_result: Option<bool>,
    /// Memory key override.
    pub memory_key: Option<String>,
    /// Memory category override.
    pub memory_category: Option<String>,
}

/// Goal-generation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct GoalsPolicy {
    /// Master switch for goal generation.
    pub auto_generate_jobs: bool,
    /// Default cooldown for templates without their own, seconds.
    pub generate_jobs_every_seconds: u64,
    /// The templates.
    pub templates: Vec<GoalTemplate>,
}

impl Default for GoalsPolicy {
    fn default() -> Self {
        Self {
            auto_generate_jobs: false,
            generate_jobs_every_seconds: 900,
            templates: Vec::new(),
        }
    }
}

/// The complete versioned policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct BrainPolicy {
    /// Policy format version.
    pub version: u32,
    /// Timer knobs.
    pub timers: TimersPolicy,
    /// Decision gates.
    pub decisions: DecisionsPolicy,
    /// Growth targets.
    pub growth: GrowthPolicy,
    /// Goal templates.
    pub goals: GoalsPolicy,
}

/// Merge `overlay` onto `base` in place: objects recurse, everything else
/// overwrites.
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(slot) => deep_merge(slot, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

/// Errors from the policy store.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    /// Disk I/O failed.
    #[error("policy io: {0}")]
    Io(#[from] std::io::Error),
    /// Encoding or merge failed.
    #[error("policy encode: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Owner of the policy file.
pub struct PolicyStore {
    policy: Mutex<BrainPolicy>,
    path: Option<PathBuf>,
}

impl PolicyStore {
    /// In-memory store seeded with `policy` (tests).
    #[must_use]
    pub fn in_memory(policy: BrainPolicy) -> Self {
        Self {
            policy: Mutex::new(policy),
            path: None,
        }
    }

    /// Load from `path`, deep-merging the file over the default policy.
    /// Absent or malformed files fall back to the default.
    #[must_use]
    pub fn load(path: &Path) -> Self {
        let mut merged = serde_json::to_value(BrainPolicy::default()).unwrap_or_default();
        match std::fs::read(path) {
            Ok(bytes) => match serde_json::from_slice::<Value>(&bytes) {
                Ok(overlay) => deep_merge(&mut merged, overlay),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "unreadable policy file; using defaults");
                }
            },
            Err(_) => {}
        }
        let policy = serde_json::from_value(merged).unwrap_or_else(|e| {
            warn!(error = %e, "policy did not fit the schema; using defaults");
            BrainPolicy::default()
        });
        Self {
            policy: Mutex::new(policy),
            path: Some(path.to_path_buf()),
        }
    }

    /// A snapshot of the current policy.
    #[must_use]
    pub fn get(&self) -> BrainPolicy {
        self.policy.lock().expect("policy store poisoned").clone()
    }

    /// Replace the policy and persist it atomically.
    ///
    /// # Errors
    ///
    /// Persistence failures.
    pub fn set(&self, policy: BrainPolicy) -> Result<(), PolicyError> {
        {
            let mut guard = self.policy.lock().expect("policy store poisoned");
            *guard = policy;
        }
        self.save()
    }

    /// Persist the current policy atomically.
    ///
    /// # Errors
    ///
    /// Persistence failures.
    pub fn save(&self) -> Result<(), PolicyError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let policy = self.get();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec_pretty(&policy)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}
