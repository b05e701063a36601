// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! claw-peers
#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use claw_core::{IdentityKey, normalize_endpoint};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, warn};

/// Peers idle longer than this are evicted on the next mutation.
pub const STALE_AFTER_DAYS: i64 = 7;

/// Hard cap on registry size; lowest-reputation peers go first.
pub const MAX_PEERS: usize = 500;

/// Debounce window for persistence after a mutation.
pub const FLUSH_DEBOUNCE: Duration = Duration::from_secs(5);

/// A known remote claw.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerRecord {
    /// Primary key.
    pub identity_key: IdentityKey,
    /// Human-facing claw identifier.
    pub claw_id: String,
    /// Public endpoint, when advertised.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Capability names the peer advertises.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Chain tag the peer settles on.
    pub chain: String,
    /// Last successful contact. Monotonic across updates.
    pub last_seen: DateTime<Utc>,
    /// Reputation score in `[0, 100]`.
    pub reputation: u8,
}

impl PeerRecord {
    /// A minimal record for a peer first seen now.
    #[must_use]
    pub fn new(identity_key: IdentityKey, claw_id: String, chain: String, reputation: u8) -> Self {
        Self {
            identity_key,
            claw_id,
            endpoint: None,
            capabilities: Vec::new(),
            chain,
            last_seen: Utc::now(),
            reputation: reputation.min(100),
        }
    }
}

/// Errors from registry persistence.
#[derive(Debug, thiserror::Error)]
pub enum PeerStoreError {
    /// Disk I/O failed.
    #[error("peer store io: {0}")]
    Io(#[from] std::io::Error),
    /// The peers file could not be serialized.
    #[error("peer store encode: {0}")]
    Encode(#[from] serde_json::Error),
}

/// The single owner of peer records.
///
/// All mutations are serialized behind one mutex and followed by the
/// eviction pass; each mutation marks the registry dirty for the
/// debounced flusher.
pub struct PeerRegistry {
    inner: Mutex<HashMap<String, PeerRecord>>,
    path: Option<PathBuf>,
    dirty: Notify,
}

impl PeerRegistry {
    /// An in-memory registry without persistence (tests, probes).
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            path: None,
            dirty: Notify::new(),
        }
    }

    /// Load the registry from `path`, starting empty when the file is
    /// absent. A malformed file is logged and treated as empty rather
    /// than aborting startup.
    #[must_use]
    pub fn load(path: &Path) -> Self {
        let mut map = HashMap::new();
        match std::fs::read(path) {
            Ok(bytes) => match serde_json::from_slice::<Vec<PeerRecord>>(&bytes) {
                Ok(records) => {
                    for mut rec in records {
                        rec.reputation = rec.reputation.min(100);
                        map.insert(rec.identity_key.as_str().to_string(), rec);
                    }
                }
                Err(e) => warn!(path = %path.display(), error = %e, "unreadable peers file; starting empty"),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "failed to read peers file; starting empty"),
        }
        Self {
            inner: Mutex::new(map),
            path: Some(path.to_path_buf()),
            dirty: Notify::new(),
        }
    }

    // -- queries --------------------------------------------------------

    /// Look up a peer by identity key.
    #[must_use]
    pub fn get(&self, id: &IdentityKey) -> Option<PeerRecord> {
        self.inner
            .lock()
            .expect("peer registry poisoned")
            .get(id.as_str())
            .cloned()
    }

    /// Look up a peer by normalized endpoint.
    #[must_use]
    pub fn get_by_endpoint(&self, endpoint: &str) -> Option<PeerRecord> {
        let wanted = normalize_endpoint(endpoint)?;
        self.inner
            .lock()
            .expect("peer registry poisoned")
            .values()
            .find(|p| {
                p.endpoint
                    .as_deref()
                    .and_then(normalize_endpoint)
                    .is_some_and(|ep| ep == wanted)
            })
            .cloned()
    }

    /// All peers, unsorted.
    #[must_use]
    pub fn all(&self) -> Vec<PeerRecord> {
        self.inner
            .lock()
            .expect("peer registry poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Peers advertising `capability`.
    #[must_use]
    pub fn by_capability(&self, capability: &str) -> Vec<PeerRecord> {
        self.inner
            .lock()
            .expect("peer registry poisoned")
            .values()
            .filter(|p| p.capabilities.iter().any(|c| c == capability))
            .cloned()
            .collect()
    }

    /// Peers on the given chain.
    #[must_use]
    pub fn by_chain(&self, chain: &str) -> Vec<PeerRecord> {
        self.inner
            .lock()
            .expect("peer registry poisoned")
            .values()
            .filter(|p| p.chain == chain)
            .cloned()
            .collect()
    }

    /// Number of known peers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().expect("peer registry poisoned").len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // -- mutations ------------------------------------------------------

    /// Insert or merge a peer record.
    ///
    /// Merging keeps the higher reputation, takes the new endpoint and
    /// capability list when present, and never moves `last_seen`
    /// backwards.
    pub fn add(&self, mut peer: PeerRecord) {
        peer.reputation = peer.reputation.min(100);
        {
            let mut inner = self.inner.lock().expect("peer registry poisoned");
            match inner.get_mut(peer.identity_key.as_str()) {
                Some(existing) => {
                    existing.reputation = existing.reputation.max(peer.reputation);
                    existing.last_seen = existing.last_seen.max(peer.last_seen);
                    existing.claw_id = peer.claw_id;
                    existing.chain = peer.chain;
                    if peer.endpoint.is_some() {
                        existing.endpoint = peer.endpoint;
                    }
                    if !peer.capabilities.is_empty() {
                        existing.capabilities = peer.capabilities;
                    }
                }
                None => {
                    inner.insert(peer.identity_key.as_str().to_string(), peer);
                }
            }
            Self::evict(&mut inner);
        }
        self.mark_dirty();
    }

    /// Remove a peer.
    pub fn remove(&self, id: &IdentityKey) -> bool {
        let removed = {
            let mut inner = self.inner.lock().expect("peer registry poisoned");
            let removed = inner.remove(id.as_str()).is_some();
            Self::evict(&mut inner);
            removed
        };
        if removed {
            self.mark_dirty();
        }
        removed
    }

    /// Reward a successful interaction: +1 reputation (cap 100), bump
    /// `last_seen`.
    pub fn record_success(&self, id: &IdentityKey) {
        {
            let mut inner = self.inner.lock().expect("peer registry poisoned");
            if let Some(peer) = inner.get_mut(id.as_str()) {
                peer.reputation = (peer.reputation + 1).min(100);
                peer.last_seen = Utc::now();
            }
            Self::evict(&mut inner);
        }
        self.mark_dirty();
    }

    /// Penalize a failed interaction: −5 reputation (floor 0).
    pub fn record_failure(&self, id: &IdentityKey) {
        {
            let mut inner = self.inner.lock().expect("peer registry poisoned");
            if let Some(peer) = inner.get_mut(id.as_str()) {
                peer.reputation = peer.reputation.saturating_sub(5);
            }
            Self::evict(&mut inner);
        }
        self.mark_dirty();
    }

    /// Stale peers out, then lowest-reputation peers out past the cap.
    fn evict(inner: &mut HashMap<String, PeerRecord>) {
        let cutoff = Utc::now() - ChronoDuration::days(STALE_AFTER_DAYS);
        inner.retain(|_, p| p.last_seen >= cutoff);

        if inner.len() > MAX_PEERS {
            let mut ranked: Vec<(String, u8)> = inner
                .iter()
                .map(|(k, p)| (k.clone(), p.reputation))
                .collect();
            ranked.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
            let excess = inner.len() - MAX_PEERS;
            for (key, _) in ranked.into_iter().take(excess) {
                inner.remove(&key);
            }
        }
    }

    // -- persistence ----------------------------------------------------

    fn mark_dirty(&self) {
        if self.path.is_some() {
            self.dirty.notify_one();
        }
    }

    /// Write the registry to disk now (atomic write-then-rename).
    ///
    /// # Errors
    ///
    /// Returns [`PeerStoreError`] on I/O or encoding failure.
    pub fn flush(&self) -> Result<(), PeerStoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut records = self.all();
        records.sort_by(|a, b| a.identity_key.cmp(&b.identity_key));
        let bytes = serde_json::to_vec_pretty(&records)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, path)?;
        debug!(path = %path.display(), peers = records.len(), "peer registry flushed");
        Ok(())
    }

    /// Run the debounced flusher until `registry` is dropped by all other
    /// holders. Each burst of mutations coalesces into one write.
    pub async fn run_flusher(registry: Arc<Self>) {
        loop {
            registry.dirty.notified().await;
            tokio::time::sleep(FLUSH_DEBOUNCE).await;
            if let Err(e) = registry.flush() {
                warn!(error = %e, "peer registry flush failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: u8) -> IdentityKey {
        // Synthesize distinct well-formed identity keys.
        IdentityKey::parse(&format!("02{:064x}", 0xbeef_0000_u64 + u64::from(n))).unwrap()
    }

    fn peer(n: u8, reputation: u8) -> PeerRecord {
        PeerRecord::new(key(n), format!("claw-{n}"), "test".into(), reputation)
    }

    #[test]
    fn add_and_get() {
        let reg = PeerRegistry::in_memory();
        reg.add(peer(1, 50));
        assert_eq!(reg.len(), 1);
        let got = reg.get(&key(1)).unwrap();
        assert_eq!(got.claw_id, "claw-1");
        assert_eq!(got.reputation, 50);
    }

    #[test]
    fn merge_keeps_max_reputation() {
        let reg = PeerRegistry::in_memory();
        reg.add(peer(1, 80));
        reg.add(peer(1, 30));
        assert_eq!(reg.get(&key(1)).unwrap().reputation, 80);
        reg.add(peer(1, 95));
        assert_eq!(reg.get(&key(1)).unwrap().reputation, 95);
    }

    #[test]
    fn merge_updates_endpoint_and_capabilities() {
        let reg = PeerRegistry::in_memory();
        reg.add(peer(1, 50));
        let mut update = peer(1, 40);
        update.endpoint = Some("http://claw.example.com:3321".into());
        update.capabilities = vec!["echo".into(), "dns_resolve".into()];
        reg.add(update);
        let got = reg.get(&key(1)).unwrap();
        assert_eq!(got.endpoint.as_deref(), Some("http://claw.example.com:3321"));
        assert_eq!(got.capabilities.len(), 2);
        assert_eq!(got.reputation, 50);
    }

    #[test]
    fn last_seen_is_monotonic() {
        let reg = PeerRegistry::in_memory();
        let mut first = peer(1, 50);
        first.last_seen = Utc::now();
        let newest = first.last_seen;
        reg.add(first);
        let mut older = peer(1, 50);
        older.last_seen = newest - ChronoDuration::hours(2);
        reg.add(older);
        assert_eq!(reg.get(&key(1)).unwrap().last_seen, newest);
    }

    #[test]
    fn reputation_bounds() {
        let reg = PeerRegistry::in_memory();
        reg.add(peer(1, 100));
        reg.record_success(&key(1));
        assert_eq!(reg.get(&key(1)).unwrap().reputation, 100);

        reg.add(peer(2, 3));
        reg.record_failure(&key(2));
        assert_eq!(reg.get(&key(2)).unwrap().reputation, 0);
    }

    #[test]
    fn stale_peers_evicted_on_mutation() {
        let reg = PeerRegistry::in_memory();
        let mut old = peer(1, 90);
        old.last_seen = Utc::now() - ChronoDuration::days(8);
        reg.add(old);
        // The insert itself runs eviction.
        assert_eq!(reg.len(), 0);

        let mut nearly = peer(2, 90);
        nearly.last_seen = Utc::now() - ChronoDuration::days(6);
        reg.add(nearly);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn capacity_evicts_lowest_reputation() {
        let reg = PeerRegistry::in_memory();
        // MAX_PEERS distinct keys need more than u8; use a direct loop on
        // two-byte suffixes.
        for i in 0..=MAX_PEERS {
            let k = IdentityKey::parse(&format!("03{i:064x}")).unwrap();
            let mut p = PeerRecord::new(k, format!("claw-{i}"), "test".into(), 50);
            if i == 7 {
                p.reputation = 1; // the designated victim
            }
            reg.add(p);
        }
        assert_eq!(reg.len(), MAX_PEERS);
        let victim = IdentityKey::parse(&format!("03{:064x}", 7)).unwrap();
        assert!(reg.get(&victim).is_none());
    }

    #[test]
    fn by_capability_and_chain() {
        let reg = PeerRegistry::in_memory();
        let mut a = peer(1, 50);
        a.capabilities = vec!["echo".into()];
        reg.add(a);
        let mut b = peer(2, 50);
        b.capabilities = vec!["dns_resolve".into()];
        b.chain = "main".into();
        reg.add(b);

        assert_eq!(reg.by_capability("echo").len(), 1);
        assert_eq!(reg.by_capability("dns_resolve").len(), 1);
        assert_eq!(reg.by_capability("fetch_url").len(), 0);
        assert_eq!(reg.by_chain("main").len(), 1);
        assert_eq!(reg.by_chain("test").len(), 1);
    }

    #[test]
    fn endpoint_lookup_normalizes() {
        let reg = PeerRegistry::in_memory();
        let mut p = peer(1, 50);
        p.endpoint = Some("http://claw.example.com:3321".into());
        reg.add(p);
        assert!(reg.get_by_endpoint("http://claw.example.com:3321/").is_some());
        assert!(reg.get_by_endpoint("http://claw.example.com:3321?x=1").is_some());
        assert!(reg.get_by_endpoint("http://other.example.com").is_none());
    }

    #[test]
    fn flush_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("peers.json");

        let reg = PeerRegistry::load(&path);
        let mut p = peer(1, 77);
        p.endpoint = Some("http://claw.example.com:3321".into());
        p.capabilities = vec!["echo".into()];
        reg.add(p);
        reg.flush().unwrap();

        let restored = PeerRegistry::load(&path);
        assert_eq!(restored.len(), 1);
        let got = restored.get(&key(1)).unwrap();
        assert_eq!(got.reputation, 77);
        assert_eq!(got.endpoint.as_deref(), Some("http://claw.example.com:3321"));
        assert_eq!(got.capabilities, vec!["echo".to_string()]);
    }

    #[test]
    fn malformed_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("peers.json");
        std::fs::write(&path, b"{ not json").unwrap();
        let reg = PeerRegistry::load(&path);
        assert!(reg.is_empty());
    }
}
