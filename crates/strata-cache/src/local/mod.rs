//! Process-local (L1) tier: a bounded store plus the tag index that mirrors it.
//!
//! Both halves live behind a single lock in the facade and are always mutated
//! together, so a key is indexed under a tag exactly while its stored entry
//! declares that tag.

pub mod policy;
pub mod store;
pub mod tags;

use std::time::Duration;

pub use policy::EvictionPolicy;
pub use store::{CacheEntry, InsertOutcome, LocalStore, Lookup, StoreStats};
pub use tags::TagIndex;

pub struct LocalTier<V> {
    store: LocalStore<V>,
    tags: TagIndex,
}

impl<V: Clone> LocalTier<V> {
    pub fn new(name: impl Into<String>, policy: EvictionPolicy) -> Self {
        Self {
            store: LocalStore::new(name, policy),
            tags: TagIndex::new(),
        }
    }

    /// Fresh value for `key`. Expired entries are dropped from the index too.
    pub fn get(&mut self, key: &str) -> Option<V> {
        match self.store.get(key) {
            Lookup::Hit(entry) => Some(entry.value.clone()),
            Lookup::Expired => {
                self.tags.untrack(key);
                None
            }
            Lookup::Missing => None,
        }
    }

    /// Store `value` and index it under `tags`. Returns false on admission rejection.
    pub fn insert(
        &mut self,
        key: &str,
        value: V,
        ttl: Duration,
        size_bytes: usize,
        tags: &[String],
    ) -> bool {
        match self.store.insert(key, value, ttl, size_bytes) {
            InsertOutcome::Stored { evicted } => {
                for victim in &evicted {
                    self.tags.untrack(victim);
                }
                self.tags.track(key, tags);
                true
            }
            InsertOutcome::Rejected => {
                self.tags.untrack(key);
                false
            }
        }
    }

    /// Evict `key` from the store and the index. Returns whether it was stored.
    pub fn remove(&mut self, key: &str) -> bool {
        self.tags.untrack(key);
        self.store.remove(key).is_some()
    }

    /// Evict every listed key, returning how many were stored.
    pub fn remove_many<S: AsRef<str>>(&mut self, keys: &[S]) -> usize {
        keys.iter().filter(|key| self.remove(key.as_ref())).count()
    }

    pub fn tags_for_key(&self, key: &str) -> Vec<String> {
        self.tags.tags_for_key(key)
    }

    pub fn keys_for_tag(&self, tag: &str) -> Vec<String> {
        self.tags.keys_for_tag(tag)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.store.contains_key(key)
    }

    pub fn purge_expired(&mut self) -> usize {
        let expired = self.store.purge_expired();
        for key in &expired {
            self.tags.untrack(key);
        }
        expired.len()
    }

    pub fn clear(&mut self) {
        self.store.clear();
        self.tags.clear();
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn stats(&self) -> StoreStats {
        self.store.stats()
    }
}
