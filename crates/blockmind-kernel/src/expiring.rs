//! [`ExpiringMap`] – key → expiry deadline, evicted lazily.
//!
//! Every cooldown in the agent (blocked actions, blocked harvest cells,
//! blocked placement cells) is an `ExpiringMap`.  Entries are never swept on
//! a timer; an expired key is dropped the next time it is looked up, or in
//! bulk via [`ExpiringMap::purge`].
//!
//! # Example
//!
//! ```
//! use std::time::{Duration, Instant};
//! use blockmind_kernel::expiring::ExpiringMap;
//!
//! let t0 = Instant::now();
//! let mut blocked = ExpiringMap::default();
//! blocked.insert_for("10:64:-3", Duration::from_secs(45), t0);
//!
//! assert!(blocked.contains(&"10:64:-3", t0 + Duration::from_secs(44)));
//! assert!(!blocked.contains(&"10:64:-3", t0 + Duration::from_secs(45)));
//! assert!(blocked.is_empty());
//! ```

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct ExpiringMap<K> {
    entries: HashMap<K, Instant>,
}

impl<K> Default for ExpiringMap<K> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Clone> ExpiringMap<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `key` with an absolute deadline, replacing any previous one.
    pub fn insert_until(&mut self, key: K, deadline: Instant) {
        self.entries.insert(key, deadline);
    }

    /// Insert `key` expiring `ttl` after `now`.
    pub fn insert_for(&mut self, key: K, ttl: Duration, now: Instant) {
        self.insert_until(key, now + ttl);
    }

    /// `true` while `key` is present and not yet expired.  An expired key is
    /// removed on the way out.
    pub fn contains(&mut self, key: &K, now: Instant) -> bool {
        match self.entries.get(key) {
            Some(deadline) if *deadline > now => true,
            Some(_) => {
                self.entries.remove(key);
                false
            }
            None => false,
        }
    }

    /// The deadline of `key`, expired or not.
    pub fn expires_at(&self, key: &K) -> Option<Instant> {
        self.entries.get(key).copied()
    }

    pub fn remove(&mut self, key: &K) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, deadline| *deadline > now);
        before - self.entries.len()
    }

    /// Live keys with their remaining time, for status reporting.
    pub fn active(&self, now: Instant) -> Vec<(K, Duration)> {
        self.entries
            .iter()
            .filter(|(_, deadline)| **deadline > now)
            .map(|(k, deadline)| (k.clone(), deadline.saturating_duration_since(now)))
            .collect()
    }

    /// Number of stored entries, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
