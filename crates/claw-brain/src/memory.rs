// SPDX-License-Identifier: MIT OR Apache-2.0
//! On-chain memory writer seam.
//!
//! Writing results to chain memory is an external collaborator; the brain
//! only needs write-by-key. `FileMemoryWriter` is the local
//! implementation backing `data/memory-index.json`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use claw_core::canonical_sha256;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Errors from memory writes.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// Disk I/O failed.
    #[error("memory io: {0}")]
    Io(#[from] std::io::Error),
    /// The entry could not be encoded.
    #[error("memory encode: {0}")]
    Encode(#[from] serde_json::Error),
    /// The writer rejected the entry.
    #[error("memory write rejected: {0}")]
    Rejected(String),
}

/// Write-by-key interface to on-chain memory.
#[async_trait]
pub trait MemoryWriter: Send + Sync {
    /// Persist `value` under `key`/`category`; returns the transaction id
    /// of the write.
    async fn write(
        &self,
        key: &str,
        category: &str,
        value: &Value,
    ) -> Result<String, MemoryError>;
}

/// One recorded memory entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryEntry {
    /// Entry key.
    pub key: String,
    /// Entry category.
    pub category: String,
    /// The stored value.
    pub value: Value,
    /// Transaction id of the write.
    pub txid: String,
    /// When the entry was written.
    pub written_at: DateTime<Utc>,
}

/// File-backed memory index at `data/memory-index.json`.
pub struct FileMemoryWriter {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileMemoryWriter {
    /// Writer over `path`.
    #[must_use]
    pub fn at(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    /// All recorded entries, oldest first.
    #[must_use]
    pub fn entries(&self) -> Vec<MemoryEntry> {
        std::fs::read(&self.path)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .unwrap_or_default()
    }
}

#[async_trait]
impl MemoryWriter for FileMemoryWriter {
    async fn write(
        &self,
        key: &str,
        category: &str,
        value: &Value,
    ) -> Result<String, MemoryError> {
        if key.is_empty() {
            return Err(MemoryError::Rejected("empty memory key".into()));
        }
        let entry = MemoryEntry {
            key: key.to_string(),
            category: category.to_string(),
            value: value.clone(),
            txid: canonical_sha256(&(key, category, value, Utc::now().timestamp()))
                .map_err(|e| MemoryError::Rejected(e.to_string()))?,
            written_at: Utc::now(),
        };
        let txid = entry.txid.clone();

        let _guard = self.write_lock.lock().expect("memory writer poisoned");
        let mut entries = self.entries();
        entries.push(entry);
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec_pretty(&entries)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(txid)
    }
}
