//! Bounded key→entry table with lazy expiry and policy-driven eviction.

use std::time::{Duration, Instant};

use indexmap::IndexMap;

use super::policy::EvictionPolicy;
use crate::config::clamp_ttl;
use crate::metrics;

/// A locally cached entry. Replaced wholesale on every write; only the
/// access bookkeeping is updated in place.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<V> {
    pub value: V,
    pub expires_at: Instant,
    pub size_bytes: usize,
    pub access_count: u64,
    pub last_accessed_at: Instant,
}

impl<V> CacheEntry<V> {
    fn new(value: V, ttl: Duration, size_bytes: usize) -> Self {
        let now = Instant::now();
        Self {
            value,
            expires_at: now + clamp_ttl(ttl),
            size_bytes,
            access_count: 1,
            last_accessed_at: now,
        }
    }

    #[inline]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now > self.expires_at
    }
}

/// Result of a lookup.
#[derive(Debug, PartialEq, Eq)]
pub enum Lookup<T> {
    Hit(T),
    /// The entry existed but had expired; it has been removed.
    Expired,
    Missing,
}

/// Result of an insert.
#[derive(Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Stored, after evicting the listed keys to make room.
    Stored { evicted: Vec<String> },
    /// The entry alone exceeds the budget and was not stored.
    Rejected,
}

/// Counters kept by the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub entries: usize,
    pub bytes: usize,
    pub expired: u64,
    pub evicted: u64,
    pub rejected: u64,
}

/// Process-local bounded cache table.
pub struct LocalStore<V> {
    name: String,
    policy: EvictionPolicy,
    entries: IndexMap<String, CacheEntry<V>>,
    used: usize,
    bytes: usize,
    expired: u64,
    evicted: u64,
    rejected: u64,
}

impl<V> LocalStore<V> {
    /// Create an empty store. `name` labels log lines and metrics.
    pub fn new(name: impl Into<String>, policy: EvictionPolicy) -> Self {
        Self {
            name: name.into(),
            policy,
            entries: IndexMap::new(),
            used: 0,
            bytes: 0,
            expired: 0,
            evicted: 0,
            rejected: 0,
        }
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Look up a key, removing it if it has expired.
    ///
    /// A hit bumps `access_count` and `last_accessed_at`.
    pub fn get(&mut self, key: &str) -> Lookup<&CacheEntry<V>> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            None => return Lookup::Missing,
            Some(entry) => entry.is_expired_at(now),
        };

        if expired {
            self.remove(key);
            self.expired += 1;
            metrics::record_eviction(&self.name, metrics::EvictionReason::Expired);
            tracing::debug!(cache = %self.name, key = %key, "local entry expired");
            return Lookup::Expired;
        }

        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.access_count += 1;
                entry.last_accessed_at = now;
                Lookup::Hit(&*entry)
            }
            None => Lookup::Missing,
        }
    }

    /// Insert or replace an entry.
    ///
    /// Any existing entry for `key` is removed first. If the new entry's weight
    /// exceeds the whole budget it is rejected; otherwise victims are evicted
    /// until it fits.
    pub fn insert(
        &mut self,
        key: &str,
        value: V,
        ttl: Duration,
        size_bytes: usize,
    ) -> InsertOutcome {
        self.remove(key);

        let weight = self.policy.weight(size_bytes);
        let budget = self.policy.budget();
        if weight > budget {
            self.rejected += 1;
            metrics::record_rejection(&self.name);
            tracing::warn!(
                cache = %self.name,
                key = %key,
                size_bytes,
                budget,
                "entry exceeds local cache budget, not stored"
            );
            return InsertOutcome::Rejected;
        }

        let mut evicted = Vec::new();
        while self.used + weight > budget {
            let Some(victim) = self.policy.select_victim(&self.entries) else {
                break;
            };
            self.remove(&victim);
            self.evicted += 1;
            metrics::record_eviction(&self.name, metrics::EvictionReason::Capacity);
            tracing::debug!(cache = %self.name, key = %victim, policy = self.policy.name(), "evicted local entry");
            evicted.push(victim);
        }

        self.used += weight;
        self.bytes += size_bytes;
        self.entries
            .insert(key.to_string(), CacheEntry::new(value, ttl, size_bytes));
        metrics::set_entries(&self.name, self.entries.len());

        InsertOutcome::Stored { evicted }
    }

    /// Remove an entry, returning it if present.
    pub fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let entry = self.entries.shift_remove(key)?;
        self.used -= self.policy.weight(entry.size_bytes);
        self.bytes -= entry.size_bytes;
        metrics::set_entries(&self.name, self.entries.len());
        Some(entry)
    }

    /// Remove every expired entry, returning the removed keys.
    pub fn purge_expired(&mut self) -> Vec<String> {
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.remove(key);
            self.expired += 1;
            metrics::record_eviction(&self.name, metrics::EvictionReason::Expired);
        }
        expired
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.used = 0;
        self.bytes = 0;
        metrics::set_entries(&self.name, 0);
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            entries: self.entries.len(),
            bytes: self.bytes,
            expired: self.expired,
            evicted: self.evicted,
            rejected: self.rejected,
        }
    }
}
