//! Eviction policies for the local tier.

use indexmap::IndexMap;

use super::store::CacheEntry;

/// How the local tier weighs entries and chooses victims when over budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Byte-budgeted approximate LRU. Entries weigh their serialized size and
    /// the oldest (re-)insertion is evicted first. Hits do not reorder.
    SizeLru { max_bytes: usize },

    /// Count-budgeted LFU. Every entry weighs 1; the lowest access count is
    /// evicted first, ties going to the least recently accessed.
    Lfu { max_entries: usize },
}

impl EvictionPolicy {
    /// Total weight the store may hold.
    pub fn budget(&self) -> usize {
        match self {
            EvictionPolicy::SizeLru { max_bytes } => *max_bytes,
            EvictionPolicy::Lfu { max_entries } => *max_entries,
        }
    }

    /// Weight an entry of `size_bytes` counts against the budget.
    pub fn weight(&self, size_bytes: usize) -> usize {
        match self {
            EvictionPolicy::SizeLru { .. } => size_bytes,
            EvictionPolicy::Lfu { .. } => 1,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EvictionPolicy::SizeLru { .. } => "size_lru",
            EvictionPolicy::Lfu { .. } => "lfu",
        }
    }

    /// Pick the next entry to evict, if any.
    pub fn select_victim<V>(&self, entries: &IndexMap<String, CacheEntry<V>>) -> Option<String> {
        match self {
            EvictionPolicy::SizeLru { .. } => entries.keys().next().cloned(),
            EvictionPolicy::Lfu { .. } => entries
                .iter()
                .min_by_key(|(_, entry)| (entry.access_count, entry.last_accessed_at))
                .map(|(key, _)| key.clone()),
        }
    }
}
