// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! claw-config
#![deny(unsafe_code)]
#![warn(missing_docs)]

use claw_core::IdentityKey;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Environment variable carrying the 64-hex-char root secret.
pub const ENV_ROOT_KEY: &str = "CLAWSATS_ROOT_KEY_HEX";
/// Environment variable overriding the directory listing URL.
pub const ENV_DIRECTORY_URL: &str = "CLAWSATS_DIRECTORY_URL";
/// Environment variable overriding the directory registration URL.
pub const ENV_DIRECTORY_REGISTER_URL: &str = "CLAWSATS_DIRECTORY_REGISTER_URL";
/// Environment variable overriding the config file path.
pub const ENV_CONFIG_PATH: &str = "CLAWSATS_CONFIG_PATH";

/// Default config file location relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/wallet-config.json";

/// Default bound port.
pub const DEFAULT_PORT: u16 = 3321;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration loading or saving.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The file could not be parsed.
    #[error("failed to parse config: {reason}")]
    Parse {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Disk I/O failed.
    #[error("config io: {0}")]
    Io(#[from] std::io::Error),

    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    Validation {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// WalletConfig
// ---------------------------------------------------------------------------

/// Fee parameters recorded alongside the wallet settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FeeSettings {
    /// Protocol fee per paid call, satoshis.
    pub fee_sats: u64,
    /// Fee recipient identity key.
    pub fee_identity_key: String,
}

impl Default for FeeSettings {
    fn default() -> Self {
        Self {
            fee_sats: claw_core::FEE_SATS,
            fee_identity_key: claw_core::FEE_IDENTITY_KEY.to_string(),
        }
    }
}

/// Persisted node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WalletConfig {
    /// Human-facing claw identifier.
    pub claw_id: String,
    /// This node's identity key (derived from the root secret).
    pub identity_key: Option<IdentityKey>,
    /// Chain tag (`main` / `test`).
    pub chain: String,
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Public endpoint advertised to peers, when the node has one.
    pub endpoint: Option<String>,
    /// Capability names this node advertises.
    pub capabilities: Vec<String>,
    /// Wallet storage descriptor (driver-specific).
    pub storage: Option<String>,
    /// Fee parameters.
    pub fee: FeeSettings,
    /// Root key material. Secret; stripped by [`WalletConfig::redacted`].
    pub root_key_hex: Option<String>,
    /// Bearer key for the admin surface. Secret.
    pub api_key: Option<String>,
    /// Directory listing URL.
    pub directory_url: Option<String>,
    /// Directory registration URL.
    pub directory_register_url: Option<String>,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            claw_id: "claw".to_string(),
            identity_key: None,
            chain: "test".to_string(),
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            endpoint: None,
            capabilities: Vec::new(),
            storage: None,
            fee: FeeSettings::default(),
            root_key_hex: None,
            api_key: None,
            directory_url: None,
            directory_register_url: None,
        }
    }
}

impl WalletConfig {
    /// Resolve the config path: explicit argument, `CLAWSATS_CONFIG_PATH`,
    /// then the default.
    #[must_use]
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            if !p.is_empty() {
                return PathBuf::from(p);
            }
        }
        PathBuf::from(DEFAULT_CONFIG_PATH)
    }

    /// Load from `path` and apply environment overrides.
    ///
    /// # Errors
    ///
    /// [`ConfigError::FileNotFound`] when the file is absent,
    /// [`ConfigError::Parse`] on malformed JSON.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let bytes = std::fs::read(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                ConfigError::Io(e)
            }
        })?;
        let mut config: Self = serde_json::from_slice(&bytes).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        config.apply_env();
        Ok(config)
    }

    /// Apply `CLAWSATS_*` environment overrides in place.
    pub fn apply_env(&mut self) {
        if let Ok(v) = std::env::var(ENV_ROOT_KEY) {
            if !v.is_empty() {
                self.root_key_hex = Some(v);
            }
        }
        if let Ok(v) = std::env::var(ENV_DIRECTORY_URL) {
            if !v.is_empty() {
                self.directory_url = Some(v);
            }
        }
        if let Ok(v) = std::env::var(ENV_DIRECTORY_REGISTER_URL) {
            if !v.is_empty() {
                self.directory_register_url = Some(v);
            }
        }
    }

    /// Accumulate semantic problems.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Validation`] listing every problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut reasons = Vec::new();
        if self.claw_id.trim().is_empty() {
            reasons.push("clawId must not be empty".to_string());
        }
        if self.chain != "main" && self.chain != "test" {
            reasons.push(format!("unknown chain '{}'", self.chain));
        }
        if let Some(root) = &self.root_key_hex {
            if root.len() != 64 || !root.bytes().all(|b| b.is_ascii_hexdigit()) {
                reasons.push("rootKeyHex must be 64 hex chars".to_string());
            }
        }
        if let Some(ep) = &self.endpoint {
            if claw_core::validate_public_endpoint(ep).is_err() {
                reasons.push(format!("endpoint '{ep}' is not a public http(s) URL"));
            }
        }
        if reasons.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation { reasons })
        }
    }

    /// Persist to `path` with owner-only permissions.
    ///
    /// # Errors
    ///
    /// I/O or encoding failures.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec_pretty(self).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, path)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }
        warn!(path = %path.display(), "wallet config saved; file carries key material, keep it private");
        Ok(())
    }

    /// Serialization-safe view with every secret field stripped.
    ///
    /// This is the only form that may reach `/discovery`, `getConfig`,
    /// or any RPC response.
    #[must_use]
    pub fn redacted(&self) -> serde_json::Value {
        let mut v = serde_json::to_value(self).unwrap_or_default();
        if let serde_json::Value::Object(map) = &mut v {
            map.remove("rootKeyHex");
            map.remove("apiKey");
        }
        v
    }
}

// ---------------------------------------------------------------------------
// DataDirs
// ---------------------------------------------------------------------------

/// Layout of the node's mutable state files.
#[derive(Debug, Clone)]
pub struct DataDirs {
    root: PathBuf,
}

impl DataDirs {
    /// State files live under `root/data/`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn data(&self, file: &str) -> PathBuf {
        self.root.join("data").join(file)
    }

    /// Peer registry file.
    #[must_use]
    pub fn peers_file(&self) -> PathBuf {
        self.data("peers.json")
    }

    /// Brain policy file.
    #[must_use]
    pub fn policy_file(&self) -> PathBuf {
        self.data("brain-policy.json")
    }

    /// Brain event log (JSONL).
    #[must_use]
    pub fn events_file(&self) -> PathBuf {
        self.data("brain-events.jsonl")
    }

    /// Brain job queue file.
    #[must_use]
    pub fn jobs_file(&self) -> PathBuf {
        self.data("brain-jobs.json")
    }

    /// Watch-list file for `claw watch`.
    #[must_use]
    pub fn watch_peers_file(&self) -> PathBuf {
        self.data("watch-peers.json")
    }

    /// On-chain memory index file.
    #[must_use]
    pub fn memory_index_file(&self) -> PathBuf {
        self.data("memory-index.json")
    }
}
