//! Cache metrics.
//!
//! Recorded through the `metrics` facade. Without an installed recorder these
//! calls are no-ops; exporting (Prometheus or otherwise) is up to the host.

use metrics::{counter, gauge};

/// Metric names as constants for consistency.
pub mod names {
    pub const CACHE_HITS_TOTAL: &str = "strata_cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "strata_cache_misses_total";
    pub const CACHE_EVICTIONS_TOTAL: &str = "strata_cache_evictions_total";
    pub const CACHE_REJECTIONS_TOTAL: &str = "strata_cache_rejections_total";
    pub const CACHE_INVALIDATIONS_TOTAL: &str = "strata_cache_invalidations_total";
    pub const CACHE_REMOTE_ERRORS_TOTAL: &str = "strata_cache_remote_errors_total";
    pub const CACHE_ENTRIES: &str = "strata_cache_entries";
}

/// Tier that served a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    L1,
    L2,
}

impl Tier {
    fn as_str(self) -> &'static str {
        match self {
            Tier::L1 => "L1",
            Tier::L2 => "L2",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    Expired,
    Capacity,
}

impl EvictionReason {
    fn as_str(self) -> &'static str {
        match self {
            EvictionReason::Expired => "expired",
            EvictionReason::Capacity => "capacity",
        }
    }
}

/// Where an invalidation originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationSource {
    /// Called on this instance.
    Local,
    /// Received from a peer over the invalidation channel.
    Remote,
}

impl InvalidationSource {
    fn as_str(self) -> &'static str {
        match self {
            InvalidationSource::Local => "local",
            InvalidationSource::Remote => "remote",
        }
    }
}

pub fn record_hit(cache: &str, tier: Tier) {
    counter!(
        names::CACHE_HITS_TOTAL,
        "cache" => cache.to_string(),
        "tier" => tier.as_str()
    )
    .increment(1);
}

pub fn record_miss(cache: &str) {
    counter!(names::CACHE_MISSES_TOTAL, "cache" => cache.to_string()).increment(1);
}

pub fn record_eviction(cache: &str, reason: EvictionReason) {
    counter!(
        names::CACHE_EVICTIONS_TOTAL,
        "cache" => cache.to_string(),
        "reason" => reason.as_str()
    )
    .increment(1);
}

pub fn record_rejection(cache: &str) {
    counter!(names::CACHE_REJECTIONS_TOTAL, "cache" => cache.to_string()).increment(1);
}

/// `kind` is the invalidation message type: `"key"` or `"tag"`.
pub fn record_invalidation(cache: &str, kind: &'static str, source: InvalidationSource) {
    counter!(
        names::CACHE_INVALIDATIONS_TOTAL,
        "cache" => cache.to_string(),
        "kind" => kind,
        "source" => source.as_str()
    )
    .increment(1);
}

pub fn record_remote_error(cache: &str, op: &'static str) {
    counter!(
        names::CACHE_REMOTE_ERRORS_TOTAL,
        "cache" => cache.to_string(),
        "op" => op
    )
    .increment(1);
}

pub fn set_entries(cache: &str, count: usize) {
    gauge!(names::CACHE_ENTRIES, "cache" => cache.to_string()).set(count as f64);
}
