//! Two-tier cache facade.
//!
//! ## Cache Hierarchy
//!
//! ```text
//! get    → L1 (local store) → L2 (shared tier) → absent
//! wrap   → get → singleflight(factory) → set
//! set    → L1 + tag index → L2 + L2 tag sets → publish {type:"key"}
//! invalidate        → L1 → L2 key + tag sets → publish {type:"key"}
//! invalidate_by_tag → resolve members → L1 → L2 keys + tag set → publish {type:"tag"}
//! ```
//!
//! ## Graceful Degradation
//!
//! Every shared tier failure is logged and treated as if there were no shared
//! tier for that call. Only a `wrap` factory error ever reaches the caller.
//!
//! ## Consistency
//!
//! Peers drop their L1 copies when the invalidation message arrives, or when
//! their local TTL (capped by `l1_fallback_ttl_secs`) runs out, whichever is
//! first. A direct `set` racing an in-flight `wrap` on the same key resolves
//! as last writer wins in the shared tier.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::bus::{InvalidationBus, Subscription};
use crate::config::{CacheConfig, clamp_ttl};
use crate::error::{CacheError, CacheResult, RemoteError};
use crate::keys::KeySpace;
use crate::local::{EvictionPolicy, LocalTier};
use crate::metrics::{self, InvalidationSource, Tier};
use crate::payload::CachedPayload;
use crate::remote::DynRemote;
use crate::singleflight::Singleflight;

/// Serialized size of a JSON value, used as its local weight.
pub(crate) fn json_size(value: &Value) -> usize {
    serde_json::to_vec(value).map_or(0, |bytes| bytes.len())
}

fn owned_tags(tags: &[&str]) -> Vec<String> {
    tags.iter().map(|tag| tag.to_string()).collect()
}

/// Cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// "local", or the shared tier kind ("redis", "memory")
    pub mode: String,
    pub entries: usize,
    pub bytes: usize,
    pub l1_hits: u64,
    pub l2_hits: u64,
    pub misses: u64,
    /// Local entries dropped because their TTL passed.
    pub expired: u64,
    /// Local entries dropped to make room.
    pub evicted: u64,
    /// Writes refused because the entry alone exceeds the local budget.
    pub rejected: u64,
    pub in_flight: usize,
}

impl CacheStats {
    /// Hit rate across both tiers as a percentage.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.l1_hits + self.l2_hits;
        let total = hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (hits as f64 / total as f64) * 100.0
        }
    }
}

#[derive(Default)]
struct Counters {
    l1_hits: AtomicU64,
    l2_hits: AtomicU64,
    misses: AtomicU64,
}

struct CacheInner {
    name: String,
    config: CacheConfig,
    keys: KeySpace,
    instance_id: String,
    local: Arc<Mutex<LocalTier<Value>>>,
    remote: Option<DynRemote>,
    bus: Option<InvalidationBus>,
    flights: Singleflight<Value>,
    subscription: Mutex<Option<Subscription>>,
    counters: Counters,
}

/// Builder for [`TieredCache`].
pub struct TieredCacheBuilder {
    name: String,
    config: CacheConfig,
    policy: Option<EvictionPolicy>,
    remote: Option<DynRemote>,
    subscribe: bool,
}

impl TieredCacheBuilder {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            name: "object".to_string(),
            config,
            policy: None,
            remote: None,
            subscribe: true,
        }
    }

    /// Label used in logs and metrics. Defaults to "object".
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Local eviction policy. Defaults to size-bounded LRU over `l1_max_bytes`.
    pub fn policy(mut self, policy: EvictionPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn remote(mut self, remote: DynRemote) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn maybe_remote(mut self, remote: Option<DynRemote>) -> Self {
        self.remote = remote;
        self
    }

    /// Whether to listen for peer invalidations. Defaults to true; tools
    /// that only issue invalidations can turn it off.
    pub fn subscribe(mut self, subscribe: bool) -> Self {
        self.subscribe = subscribe;
        self
    }

    pub async fn build(self) -> CacheResult<TieredCache> {
        self.config.validate().map_err(CacheError::Config)?;

        let policy = self.policy.unwrap_or(EvictionPolicy::SizeLru {
            max_bytes: self.config.l1_max_bytes,
        });
        let instance_id = uuid::Uuid::new_v4().to_string();
        let local = Arc::new(Mutex::new(LocalTier::new(self.name.clone(), policy)));
        let bus = self.remote.as_ref().map(|remote| {
            InvalidationBus::new(
                Arc::clone(remote),
                self.config.invalidation_channel.clone(),
                instance_id.clone(),
                self.name.clone(),
            )
        });

        let subscription = match (&bus, self.subscribe) {
            (Some(bus), true) => {
                let local = Arc::clone(&local);
                let name = self.name.clone();
                let subscription = bus
                    .subscribe(move |message| {
                        let removed = local.lock().remove_many(message.keys());
                        metrics::record_invalidation(&name, message.kind(), InvalidationSource::Remote);
                        tracing::debug!(cache = %name, kind = message.kind(), removed, "applied peer invalidation");
                    })
                    .await;
                Some(subscription)
            }
            _ => None,
        };

        tracing::info!(
            cache = %self.name,
            namespace = %self.config.namespace,
            policy = policy.name(),
            mode = self.remote.as_ref().map_or("local", |r| r.kind()),
            enabled = self.config.cache_enabled,
            "cache initialized"
        );

        Ok(TieredCache {
            inner: Arc::new(CacheInner {
                keys: KeySpace::new(self.config.namespace.clone()),
                name: self.name,
                config: self.config,
                instance_id,
                local,
                remote: self.remote,
                bus,
                flights: Singleflight::new(),
                subscription: Mutex::new(subscription),
                counters: Counters::default(),
            }),
        })
    }
}

/// Local tier backed by an optional shared tier, with tag invalidation,
/// cross-instance invalidation and in-flight deduplication.
///
/// Cheap to clone; clones share all state. Construct once at startup and
/// hand clones to consumers.
#[derive(Clone)]
pub struct TieredCache {
    inner: Arc<CacheInner>,
}

impl TieredCache {
    pub fn builder(config: CacheConfig) -> TieredCacheBuilder {
        TieredCacheBuilder::new(config)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn key_space(&self) -> &KeySpace {
        &self.inner.keys
    }

    /// Identifier carried as `origin` on this instance's invalidation messages.
    pub fn instance_id(&self) -> &str {
        &self.inner.instance_id
    }

    pub fn remote(&self) -> Option<&DynRemote> {
        self.inner.remote.as_ref()
    }

    fn enabled(&self) -> bool {
        self.inner.config.cache_enabled
    }

    fn remote_failed(&self, op: &'static str, key: &str, error: &RemoteError) {
        metrics::record_remote_error(&self.inner.name, op);
        tracing::warn!(cache = %self.inner.name, key = %key, op, error = %error, "shared tier call failed");
    }

    /// Get a value.
    ///
    /// ## Lookup Order
    ///
    /// 1. L1; an expired entry counts as a miss
    /// 2. L2; a hit is copied into L1 with TTL `min(remaining, l1_fallback_ttl)`
    ///    and its tags re-indexed
    /// 3. `None`
    ///
    /// A value that does not deserialize into `T` is reported as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if !self.enabled() {
            return None;
        }
        let nkey = self.inner.keys.value_key(key);
        let value = self.lookup(&nkey).await?;
        self.decode(&nkey, value)
    }

    fn decode<T: DeserializeOwned>(&self, nkey: &str, value: Value) -> Option<T> {
        match serde_json::from_value(value) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(cache = %self.inner.name, key = %nkey, error = %e, "cached value has unexpected shape, treating as miss");
                None
            }
        }
    }

    async fn lookup(&self, nkey: &str) -> Option<Value> {
        let cached = self.inner.local.lock().get(nkey);
        if let Some(value) = cached {
            self.inner.counters.l1_hits.fetch_add(1, Ordering::Relaxed);
            metrics::record_hit(&self.inner.name, Tier::L1);
            tracing::debug!(key = %nkey, "cache hit (L1)");
            return Some(value);
        }

        if let Some(value) = self.lookup_remote(nkey).await {
            self.inner.counters.l2_hits.fetch_add(1, Ordering::Relaxed);
            metrics::record_hit(&self.inner.name, Tier::L2);
            tracing::debug!(key = %nkey, "cache hit (L2)");
            return Some(value);
        }

        self.inner.counters.misses.fetch_add(1, Ordering::Relaxed);
        metrics::record_miss(&self.inner.name);
        tracing::debug!(key = %nkey, "cache miss");
        None
    }

    async fn lookup_remote(&self, nkey: &str) -> Option<Value> {
        let remote = self.inner.remote.as_ref()?;
        let raw = match remote.get(nkey).await {
            Ok(raw) => raw?,
            Err(e) => {
                self.remote_failed("get", nkey, &e);
                return None;
            }
        };

        let payload = match CachedPayload::decode(&raw) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(cache = %self.inner.name, key = %nkey, error = %e, "failed to parse shared tier payload, treating as miss");
                return None;
            }
        };
        let remaining = payload.remaining_ttl()?;

        let local_ttl = remaining.min(self.inner.config.l1_fallback_ttl());
        let size = json_size(&payload.value);
        self.inner.local.lock().insert(
            nkey,
            payload.value.clone(),
            local_ttl,
            size,
            payload.tags(),
        );
        Some(payload.value)
    }

    /// Set a value in both tiers.
    ///
    /// ## Write Strategy
    ///
    /// - L1 always (subject to the eviction policy), tags re-indexed
    /// - L2 with the same TTL, key added to each tag's shared set and the set's
    ///   TTL refreshed, then a key invalidation is published to peers
    ///
    /// `ttl` defaults to `default_ttl_secs`. Failures are logged, never returned.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>, tags: &[&str]) {
        if !self.enabled() {
            return;
        }
        let nkey = self.inner.keys.value_key(key);
        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(cache = %self.inner.name, key = %nkey, error = %e, "failed to serialize value, not cached");
                return;
            }
        };
        let ttl = ttl.unwrap_or_else(|| self.inner.config.default_ttl());
        self.store(&nkey, value, ttl, &owned_tags(tags)).await;
    }

    async fn store(&self, nkey: &str, value: Value, ttl: Duration, tags: &[String]) {
        let ttl = clamp_ttl(ttl);
        let size = json_size(&value);
        let payload = CachedPayload::new(value, tags, ttl);

        let stored = self
            .inner
            .local
            .lock()
            .insert(nkey, payload.value.clone(), ttl, size, tags);
        tracing::debug!(key = %nkey, stored_locally = stored, ttl_ms = ttl.as_millis() as u64, "cache set");

        let (Some(remote), Some(bus)) = (&self.inner.remote, &self.inner.bus) else {
            return;
        };

        let encoded = match payload.encode() {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::warn!(cache = %self.inner.name, key = %nkey, error = %e, "failed to encode payload");
                return;
            }
        };
        if let Err(e) = remote.set_with_ttl(nkey, ttl, &encoded).await {
            self.remote_failed("set", nkey, &e);
            return;
        }

        let member = [nkey.to_string()];
        for tag in tags {
            let tag_key = self.inner.keys.tag_key(tag);
            if let Err(e) = remote.add_to_set(&tag_key, &member).await {
                self.remote_failed("add_to_set", &tag_key, &e);
                continue;
            }
            if let Err(e) = remote.set_ttl(&tag_key, ttl).await {
                self.remote_failed("set_ttl", &tag_key, &e);
            }
        }

        bus.publish(&bus.key_message(vec![nkey.to_string()])).await;
    }

    /// Get a value, computing and caching it on a miss.
    ///
    /// Concurrent misses for the same key within this process run `factory`
    /// once; every caller gets its result or its error. On success the value
    /// is written to both tiers before any caller is released. With caching
    /// disabled the factory simply runs.
    pub async fn wrap<T, F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        tags: &[&str],
        factory: F,
    ) -> CacheResult<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        if !self.enabled() {
            return factory()
                .await
                .map_err(|e| CacheError::Factory(Arc::new(e)));
        }

        let nkey = self.inner.keys.value_key(key);
        if let Some(value) = self.lookup(&nkey).await {
            if let Some(value) = self.decode(&nkey, value) {
                return Ok(value);
            }
        }

        let ttl = ttl.unwrap_or_else(|| self.inner.config.default_ttl());
        let tags = owned_tags(tags);
        let cache = self.clone();
        let slot_key = nkey.clone();

        let value = self
            .inner
            .flights
            .run(&nkey, move || async move {
                let value = serde_json::to_value(factory().await?)?;
                cache.store(&slot_key, value.clone(), ttl, &tags).await;
                Ok(value)
            })
            .await
            .map_err(CacheError::Factory)?;

        Ok(serde_json::from_value(value)?)
    }

    /// Invalidate a key in both tiers and on every peer.
    ///
    /// The key's tags come from the shared payload when it can be read, and
    /// from the local tag index otherwise. The local index only knows keys
    /// this instance has seen, so under a partition shared tag sets may keep
    /// stale members until they expire.
    pub async fn invalidate(&self, key: &str) {
        let nkey = self.inner.keys.value_key(key);
        let tags = self.resolve_tags(&nkey).await;

        self.inner.local.lock().remove(&nkey);
        metrics::record_invalidation(&self.inner.name, "key", InvalidationSource::Local);

        let (Some(remote), Some(bus)) = (&self.inner.remote, &self.inner.bus) else {
            tracing::debug!(key = %nkey, "cache invalidated (local)");
            return;
        };

        if let Err(e) = remote.delete(std::slice::from_ref(&nkey)).await {
            self.remote_failed("delete", &nkey, &e);
        }

        for tag in &tags {
            let tag_key = self.inner.keys.tag_key(tag);
            if let Err(e) = remote.remove_from_set(&tag_key, &nkey).await {
                self.remote_failed("remove_from_set", &tag_key, &e);
                continue;
            }
            match remote.members_of_set(&tag_key).await {
                Ok(members) if members.is_empty() => {
                    if let Err(e) = remote.delete(&[tag_key.clone()]).await {
                        self.remote_failed("delete", &tag_key, &e);
                    }
                }
                Ok(_) => {}
                Err(e) => self.remote_failed("members_of_set", &tag_key, &e),
            }
        }

        bus.publish(&bus.key_message(vec![nkey.clone()])).await;
        tracing::debug!(key = %nkey, tags = tags.len(), "cache invalidated (L1+L2+pub/sub)");
    }

    async fn resolve_tags(&self, nkey: &str) -> Vec<String> {
        if let Some(remote) = &self.inner.remote {
            match remote.get(nkey).await {
                Ok(Some(raw)) => match CachedPayload::decode(&raw) {
                    Ok(payload) => return payload.tags().to_vec(),
                    Err(e) => {
                        tracing::warn!(key = %nkey, error = %e, "unreadable shared payload, using local tags");
                    }
                },
                Ok(None) => {}
                Err(e) => self.remote_failed("get", nkey, &e),
            }
        }
        self.inner.local.lock().tags_for_key(nkey)
    }

    /// Invalidate every key carrying `tag`, in both tiers and on every peer.
    ///
    /// Members are resolved once here, from the shared tag set or the local
    /// index when the shared tier is unreachable, and sent to peers with the
    /// message. Returns the invalidated keys without namespace.
    pub async fn invalidate_by_tag(&self, tag: &str) -> Vec<String> {
        let tag_key = self.inner.keys.tag_key(tag);

        let members = match &self.inner.remote {
            Some(remote) => match remote.members_of_set(&tag_key).await {
                Ok(members) => members,
                Err(e) => {
                    self.remote_failed("members_of_set", &tag_key, &e);
                    self.inner.local.lock().keys_for_tag(tag)
                }
            },
            None => self.inner.local.lock().keys_for_tag(tag),
        };

        let removed = self.inner.local.lock().remove_many(members.as_slice());
        metrics::record_invalidation(&self.inner.name, "tag", InvalidationSource::Local);

        if let (Some(remote), Some(bus)) = (&self.inner.remote, &self.inner.bus) {
            let mut doomed = members.clone();
            doomed.push(tag_key.clone());
            if let Err(e) = remote.delete(&doomed).await {
                self.remote_failed("delete", &tag_key, &e);
            }
            bus.publish(&bus.tag_message(tag, members.clone())).await;
        }

        tracing::debug!(tag = %tag, keys = members.len(), removed_locally = removed, "tag invalidated");

        members
            .iter()
            .filter_map(|nkey| self.inner.keys.caller_key(nkey))
            .map(str::to_string)
            .collect()
    }

    /// Whether `key` currently has an L1 entry (fresh or not yet swept).
    pub fn contains_local(&self, key: &str) -> bool {
        let nkey = self.inner.keys.value_key(key);
        self.inner.local.lock().contains_key(&nkey)
    }

    /// Keys the local tag index holds under `tag`, without namespace.
    pub fn local_keys_for_tag(&self, tag: &str) -> Vec<String> {
        self.inner
            .local
            .lock()
            .keys_for_tag(tag)
            .iter()
            .filter_map(|nkey| self.inner.keys.caller_key(nkey).map(str::to_string))
            .collect()
    }

    /// Drop every L1 entry on this instance only.
    pub fn clear_local(&self) {
        self.inner.local.lock().clear();
        tracing::info!(cache = %self.inner.name, "cleared local cache");
    }

    /// Sweep expired L1 entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.inner.local.lock().purge_expired()
    }

    /// Check if the shared tier is reachable (for health checks).
    pub async fn is_remote_available(&self) -> bool {
        match &self.inner.remote {
            Some(remote) => remote.ping().await.is_ok(),
            None => false,
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.inner
            .subscription
            .lock()
            .as_ref()
            .is_some_and(Subscription::is_active)
    }

    pub fn stats(&self) -> CacheStats {
        let store = self.inner.local.lock().stats();
        let counters = &self.inner.counters;
        CacheStats {
            mode: self
                .inner
                .remote
                .as_ref()
                .map_or("local", |remote| remote.kind())
                .to_string(),
            entries: store.entries,
            bytes: store.bytes,
            l1_hits: counters.l1_hits.load(Ordering::Relaxed),
            l2_hits: counters.l2_hits.load(Ordering::Relaxed),
            misses: counters.misses.load(Ordering::Relaxed),
            expired: store.expired,
            evicted: store.evicted,
            rejected: store.rejected,
            in_flight: self.inner.flights.in_flight(),
        }
    }

    /// Stop listening for peer invalidations and wait for the listener to exit.
    pub async fn shutdown(&self) {
        let subscription = self.inner.subscription.lock().take();
        if let Some(subscription) = subscription {
            subscription.unsubscribe().await;
            tracing::info!(cache = %self.inner.name, "invalidation listener stopped");
        }
    }
}
