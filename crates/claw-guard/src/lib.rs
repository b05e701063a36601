// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! claw-guard
#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// NonceCache
// ---------------------------------------------------------------------------

/// Outcome of a nonce freshness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonceCheck {
    /// `true` iff the nonce had not been seen inside the window.
    pub fresh: bool,
    /// Rejection reason when `fresh` is false.
    pub reason: Option<String>,
}

impl NonceCheck {
    fn ok() -> Self {
        Self {
            fresh: true,
            reason: None,
        }
    }

    fn rejected(reason: impl Into<String>) -> Self {
        Self {
            fresh: false,
            reason: Some(reason.into()),
        }
    }
}

struct NonceCacheInner {
    /// Insertion-ordered; timestamps are monotonic, so the front is always
    /// the oldest entry for both TTL and capacity eviction.
    order: VecDeque<(String, Instant)>,
    seen: HashSet<String>,
    capacity: usize,
}

/// Sliding-window set of seen nonces with TTL eviction and a capacity cap.
///
/// Two concurrent invitations sharing a nonce cannot both succeed: the
/// check-and-insert is a single critical section.
#[derive(Clone)]
pub struct NonceCache {
    inner: Arc<Mutex<NonceCacheInner>>,
}

/// Default nonce cache capacity.
pub const DEFAULT_NONCE_CAPACITY: usize = 1000;

impl NonceCache {
    /// Create a cache holding at most `capacity` nonces.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(NonceCacheInner {
                order: VecDeque::new(),
                seen: HashSet::new(),
                capacity: capacity.max(1),
            })),
        }
    }

    /// Returns `true` iff `nonce` was not present; inserts it either way.
    pub fn check_and_remember(&self, nonce: &str) -> bool {
        self.check_and_remember_at(nonce, Instant::now())
    }

    fn check_and_remember_at(&self, nonce: &str, now: Instant) -> bool {
        let mut inner = self.inner.lock().expect("nonce cache poisoned");
        if inner.seen.contains(nonce) {
            return false;
        }
        while inner.order.len() >= inner.capacity {
            if let Some((old, _)) = inner.order.pop_front() {
                inner.seen.remove(&old);
            }
        }
        inner.seen.insert(nonce.to_string());
        inner.order.push_back((nonce.to_string(), now));
        true
    }

    /// Validate `nonce` inside a `ttl` replay window.
    ///
    /// Rejects empty nonces, evicts every entry older than `ttl`, then
    /// applies [`NonceCache::check_and_remember`].
    pub fn validate(&self, nonce: &str, ttl: Duration) -> NonceCheck {
        self.validate_at(nonce, ttl, Instant::now())
    }

    fn validate_at(&self, nonce: &str, ttl: Duration, now: Instant) -> NonceCheck {
        if nonce.is_empty() {
            return NonceCheck::rejected("empty nonce");
        }
        {
            let mut inner = self.inner.lock().expect("nonce cache poisoned");
            while let Some((_, ts)) = inner.order.front() {
                if now.duration_since(*ts) > ttl {
                    let (old, _) = inner.order.pop_front().expect("front checked");
                    inner.seen.remove(&old);
                } else {
                    break;
                }
            }
        }
        if self.check_and_remember_at(nonce, now) {
            NonceCheck::ok()
        } else {
            NonceCheck::rejected("Nonce replay detected")
        }
    }

    /// Number of nonces currently remembered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().expect("nonce cache poisoned").order.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for NonceCache {
    fn default() -> Self {
        Self::new(DEFAULT_NONCE_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// RateLimiter
// ---------------------------------------------------------------------------

struct RateLimiterInner {
    windows: HashMap<String, VecDeque<Instant>>,
}

/// Per-key sliding-window rate limiter.
///
/// For each key, stores the timestamps of accepted events; `allow` expires
/// timestamps outside the window, rejects when the remainder has reached
/// the cap, and otherwise records the event.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Mutex<RateLimiterInner>>,
    max_per_window: u32,
    window: Duration,
}

impl RateLimiter {
    /// Create a limiter allowing `max_per_window` events per `window`.
    #[must_use]
    pub fn new(max_per_window: u32, window: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RateLimiterInner {
                windows: HashMap::new(),
            })),
            max_per_window,
            window,
        }
    }

    /// Record an event for `key` if the window still has room.
    pub fn allow(&self, key: &str) -> bool {
        self.allow_at(key, Instant::now())
    }

    fn allow_at(&self, key: &str, now: Instant) -> bool {
        let mut inner = self.inner.lock().expect("rate limiter poisoned");
        let stamps = inner.windows.entry(key.to_string()).or_default();

        while let Some(&front) = stamps.front() {
            if now.duration_since(front) > self.window {
                stamps.pop_front();
            } else {
                break;
            }
        }

        if stamps.len() as u32 >= self.max_per_window {
            return false;
        }
        stamps.push_back(now);
        true
    }

    /// Remaining capacity for `key` inside the current window.
    #[must_use]
    pub fn remaining(&self, key: &str) -> u32 {
        let inner = self.inner.lock().expect("rate limiter poisoned");
        let used = inner.windows.get(key).map_or(0, VecDeque::len) as u32;
        self.max_per_window.saturating_sub(used)
    }

    /// Drop keys whose windows have fully drained.
    pub fn cleanup(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("rate limiter poisoned");
        let window = self.window;
        inner.windows.retain(|_, stamps| {
            while let Some(&front) = stamps.front() {
                if now.duration_since(front) > window {
                    stamps.pop_front();
                } else {
                    break;
                }
            }
            !stamps.is_empty()
        });
    }

    /// Number of tracked keys.
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.inner.lock().expect("rate limiter poisoned").windows.len()
    }
}

// ---------------------------------------------------------------------------
// FifoSet
// ---------------------------------------------------------------------------

struct FifoSetInner {
    order: VecDeque<String>,
    seen: HashSet<String>,
    capacity: usize,
}

/// Bounded insertion-order set with O(1) FIFO eviction.
///
/// Backs the payment dedupe cache and the free-trial set: membership means
/// "spent". Eviction drops the oldest member first once the cap is hit.
#[derive(Clone)]
pub struct FifoSet {
    inner: Arc<Mutex<FifoSetInner>>,
}

impl FifoSet {
    /// Create a set holding at most `capacity` members.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(FifoSetInner {
                order: VecDeque::new(),
                seen: HashSet::new(),
                capacity: capacity.max(1),
            })),
        }
    }

    /// Insert `key`, returning `false` when it was already a member.
    pub fn insert(&self, key: &str) -> bool {
        let mut inner = self.inner.lock().expect("fifo set poisoned");
        if inner.seen.contains(key) {
            return false;
        }
        while inner.order.len() >= inner.capacity {
            if let Some(old) = inner.order.pop_front() {
                inner.seen.remove(&old);
            }
        }
        inner.seen.insert(key.to_string());
        inner.order.push_back(key.to_string());
        true
    }

    /// Whether `key` is currently a member.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().expect("fifo set poisoned").seen.contains(key)
    }

    /// Current member count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().expect("fifo set poisoned").order.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -- NonceCache -----------------------------------------------------

    #[test]
    fn nonce_first_seen_is_fresh() {
        let cache = NonceCache::new(10);
        assert!(cache.check_and_remember("n1"));
        assert!(!cache.check_and_remember("n1"));
    }

    #[test]
    fn nonce_empty_is_rejected() {
        let cache = NonceCache::default();
        let check = cache.validate("", Duration::from_secs(300));
        assert!(!check.fresh);
        assert_eq!(check.reason.as_deref(), Some("empty nonce"));
    }

    #[test]
    fn nonce_replay_inside_window() {
        let cache = NonceCache::default();
        let ttl = Duration::from_secs(300);
        assert!(cache.validate("n1", ttl).fresh);
        let second = cache.validate("n1", ttl);
        assert!(!second.fresh);
        assert_eq!(second.reason.as_deref(), Some("Nonce replay detected"));
    }

    #[test]
    fn nonce_expires_after_ttl() {
        let cache = NonceCache::default();
        let ttl = Duration::from_secs(60);
        let base = Instant::now();
        assert!(cache.validate_at("n1", ttl, base).fresh);
        // Inside the window: replay.
        assert!(!cache.validate_at("n1", ttl, base + Duration::from_secs(30)).fresh);
        // Past the window: the entry has been evicted and the nonce is
        // fresh again.
        assert!(cache.validate_at("n1", ttl, base + Duration::from_secs(61)).fresh);
    }

    #[test]
    fn nonce_capacity_evicts_oldest_first() {
        let cache = NonceCache::new(3);
        let base = Instant::now();
        for (i, n) in ["a", "b", "c"].iter().enumerate() {
            assert!(cache.check_and_remember_at(n, base + Duration::from_secs(i as u64)));
        }
        assert!(cache.check_and_remember_at("d", base + Duration::from_secs(3)));
        assert_eq!(cache.len(), 3);
        // "a" was the oldest and is forgotten; "b" is still remembered.
        assert!(cache.check_and_remember_at("a", base + Duration::from_secs(4)));
        assert!(!cache.check_and_remember_at("b", base + Duration::from_secs(5)));
    }

    // -- RateLimiter ----------------------------------------------------

    #[test]
    fn limiter_caps_per_key() {
        let limiter = RateLimiter::new(3, Duration::from_secs(3600));
        for _ in 0..3 {
            assert!(limiter.allow("sender-a"));
        }
        assert!(!limiter.allow("sender-a"));
        // Other keys have their own window.
        assert!(limiter.allow("sender-b"));
    }

    #[test]
    fn limiter_window_slides() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        let base = Instant::now();
        assert!(limiter.allow_at("k", base));
        assert!(limiter.allow_at("k", base + Duration::from_secs(1)));
        assert!(!limiter.allow_at("k", base + Duration::from_secs(2)));
        // First stamp falls out of the window.
        assert!(limiter.allow_at("k", base + Duration::from_secs(62)));
    }

    #[test]
    fn limiter_remaining_and_cleanup() {
        let limiter = RateLimiter::new(5, Duration::from_secs(3600));
        assert_eq!(limiter.remaining("k"), 5);
        limiter.allow("k");
        limiter.allow("k");
        assert_eq!(limiter.remaining("k"), 3);
        assert_eq!(limiter.tracked_keys(), 1);
        limiter.cleanup();
        // Entries are still inside the hour window, so the key survives.
        assert_eq!(limiter.tracked_keys(), 1);
    }

    #[test]
    fn twenty_first_invitation_is_rejected() {
        let limiter = RateLimiter::new(20, Duration::from_secs(3600));
        for _ in 0..20 {
            assert!(limiter.allow("02abc"));
        }
        assert!(!limiter.allow("02abc"));
    }

    // -- FifoSet --------------------------------------------------------

    #[test]
    fn fifo_insert_and_contains() {
        let set = FifoSet::new(10);
        assert!(set.insert("tx1"));
        assert!(!set.insert("tx1"));
        assert!(set.contains("tx1"));
        assert!(!set.contains("tx2"));
    }

    #[test]
    fn fifo_eviction_order() {
        let set = FifoSet::new(2);
        set.insert("a");
        set.insert("b");
        set.insert("c");
        assert_eq!(set.len(), 2);
        assert!(!set.contains("a"));
        assert!(set.contains("b"));
        assert!(set.contains("c"));
    }
}
