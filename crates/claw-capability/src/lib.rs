// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! claw-capability
#![deny(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use claw_core::CapabilityDescriptor;
use claw_guard::FifoSet;
use claw_peers::PeerRegistry;
use claw_wallet::WalletGateway;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Built-in handler implementations.
pub mod builtins;

pub use builtins::register_builtins;

// ---------------------------------------------------------------------------
// Handler contract
// ---------------------------------------------------------------------------

/// Errors a capability handler can fail with.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The params object is missing or malformed for this capability.
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// The request violates a handler policy (SSRF rules, hop limits).
    #[error("rejected: {0}")]
    Rejected(String),

    /// An upstream fetch or resolution failed.
    #[error("upstream failure: {0}")]
    Upstream(String),

    /// The wallet driver failed.
    #[error(transparent)]
    Wallet(#[from] claw_wallet::WalletError),
}

/// Ambient services a handler may use.
#[derive(Clone)]
pub struct HandlerContext {
    /// The node wallet.
    pub wallet: Arc<dyn WalletGateway>,
    /// The peer registry (read-mostly; `broadcast_listing` fans out to it).
    pub peers: Arc<PeerRegistry>,
    /// Shared outbound HTTP client.
    pub http: reqwest::Client,
    /// This node's claw identifier.
    pub claw_id: String,
    /// This node's chain tag.
    pub chain: String,
    /// Relay dedupe set for `broadcast_listing`.
    pub relay_seen: FifoSet,
}

/// A single capability implementation.
#[async_trait]
pub trait CapabilityHandler: Send + Sync {
    /// Execute with the parsed params object.
    async fn call(&self, params: Value, cx: &HandlerContext) -> Result<Value, HandlerError>;
}

/// A registered capability: metadata plus handler.
#[derive(Clone)]
pub struct Capability {
    /// Unique case-sensitive name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Price per call in satoshis.
    pub price_sats: u64,
    /// Classification tags.
    pub tags: Vec<String>,
    /// The implementation.
    pub handler: Arc<dyn CapabilityHandler>,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Errors from capability registration.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// A capability with the same name is already registered.
    #[error("duplicate capability name '{0}'")]
    DuplicateName(String),
}

/// In-memory map of capability name → handler + price + tags.
///
/// The registry exclusively owns handlers for the process lifetime; every
/// built-in is registered before the HTTP server accepts traffic.
#[derive(Default)]
pub struct CapabilityRegistry {
    inner: RwLock<HashMap<String, Capability>>,
}

impl CapabilityRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability.
    ///
    /// # Errors
    ///
    /// [`RegistryError::DuplicateName`] — names are case-sensitive unique.
    pub fn register(&self, capability: Capability) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().expect("capability registry poisoned");
        if inner.contains_key(&capability.name) {
            return Err(RegistryError::DuplicateName(capability.name));
        }
        inner.insert(capability.name.clone(), capability);
        Ok(())
    }

    /// Look up a capability by exact name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Capability> {
        self.inner
            .read()
            .expect("capability registry poisoned")
            .get(name)
            .cloned()
    }

    /// All registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .read()
            .expect("capability registry poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Descriptors for the discovery manifest, sorted by name.
    #[must_use]
    pub fn descriptors(&self) -> Vec<CapabilityDescriptor> {
        let mut out: Vec<CapabilityDescriptor> = self
            .inner
            .read()
            .expect("capability registry poisoned")
            .values()
            .map(|c| CapabilityDescriptor {
                name: c.name.clone(),
                description: c.description.clone(),
                price_sats: c.price_sats,
                tags: c.tags.clone(),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Number of registered capabilities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().expect("capability registry poisoned").len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Capabilities matching a case-insensitive substring of their name,
    /// description, or tags. Backs the `searchCapabilities` RPC.
    #[must_use]
    pub fn search(&self, query: &str) -> Vec<CapabilityDescriptor> {
        let q = query.to_ascii_lowercase();
        self.descriptors()
            .into_iter()
            .filter(|d| {
                q.is_empty()
                    || d.name.to_ascii_lowercase().contains(&q)
                    || d.description.to_ascii_lowercase().contains(&q)
                    || d.tags.iter().any(|t| t.to_ascii_lowercase().contains(&q))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Fixed(Value);

    #[async_trait]
    impl CapabilityHandler for Fixed {
        async fn call(&self, _params: Value, _cx: &HandlerContext) -> Result<Value, HandlerError> {
            Ok(self.0.clone())
        }
    }

    fn cap(name: &str, price: u64) -> Capability {
        Capability {
            name: name.into(),
            description: format!("{name} capability"),
            price_sats: price,
            tags: vec!["test".into()],
            handler: Arc::new(Fixed(json!({"ok": true}))),
        }
    }

    #[test]
    fn register_and_get() {
        let reg = CapabilityRegistry::new();
        reg.register(cap("echo", 10)).unwrap();
        assert_eq!(reg.len(), 1);
        let got = reg.get("echo").unwrap();
        assert_eq!(got.price_sats, 10);
        assert!(reg.get("Echo").is_none(), "names are case-sensitive");
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let reg = CapabilityRegistry::new();
        reg.register(cap("echo", 10)).unwrap();
        let err = reg.register(cap("echo", 20)).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateName(_)));
        // The original registration is untouched.
        assert_eq!(reg.get("echo").unwrap().price_sats, 10);
    }

    #[test]
    fn descriptors_are_sorted() {
        let reg = CapabilityRegistry::new();
        reg.register(cap("fetch_url", 50)).unwrap();
        reg.register(cap("echo", 10)).unwrap();
        let names: Vec<String> = reg.descriptors().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["echo".to_string(), "fetch_url".to_string()]);
    }

    #[test]
    fn search_matches_name_description_tags() {
        let reg = CapabilityRegistry::new();
        reg.register(cap("dns_resolve", 30)).unwrap();
        reg.register(cap("echo", 10)).unwrap();
        assert_eq!(reg.search("dns").len(), 1);
        assert_eq!(reg.search("capability").len(), 2);
        assert_eq!(reg.search("test").len(), 2);
        assert_eq!(reg.search("nope").len(), 0);
    }
}
