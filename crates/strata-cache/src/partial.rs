//! Short-lived partial results for progressive delivery.
//!
//! A side table next to the main cache: rows are truncated to
//! `partial_limit`, expire after `streaming_ttl_secs` and are never tagged or
//! broadcast. The short TTL bounds how stale a peer's copy can get.

use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::CacheConfig;
use crate::facade::json_size;
use crate::keys::KeySpace;
use crate::local::{EvictionPolicy, LocalStore, Lookup};
use crate::metrics;
use crate::payload::PartialPayload;
use crate::remote::DynRemote;

pub struct PartialCache {
    name: String,
    enabled: bool,
    ttl: Duration,
    limit: usize,
    keys: KeySpace,
    local: Mutex<LocalStore<Vec<Value>>>,
    remote: Option<DynRemote>,
}

impl PartialCache {
    pub fn new(name: impl Into<String>, config: &CacheConfig, remote: Option<DynRemote>) -> Self {
        let name = name.into();
        Self {
            local: Mutex::new(LocalStore::new(
                name.clone(),
                EvictionPolicy::Lfu {
                    max_entries: config.partial_max_entries,
                },
            )),
            name,
            enabled: config.cache_enabled,
            ttl: config.streaming_ttl(),
            limit: config.partial_limit,
            keys: KeySpace::new(config.namespace.clone()),
            remote,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Store the first `partial_limit` rows under `key`. Returns how many rows
    /// were kept.
    pub async fn set<T: Serialize>(&self, key: &str, rows: &[T]) -> usize {
        if !self.enabled {
            return 0;
        }
        let pkey = self.keys.partial_key(key);

        let rows = match rows
            .iter()
            .take(self.limit)
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(cache = %self.name, key = %pkey, error = %e, "failed to serialize partial rows, not cached");
                return 0;
            }
        };
        let kept = rows.len();
        let size = rows.iter().map(json_size).sum();

        self.local
            .lock()
            .insert(&pkey, rows.clone(), self.ttl, size);

        if let Some(remote) = &self.remote {
            let payload = PartialPayload::new(rows, self.ttl);
            match serde_json::to_string(&payload) {
                Ok(encoded) => {
                    if let Err(e) = remote.set_with_ttl(&pkey, self.ttl, &encoded).await {
                        metrics::record_remote_error(&self.name, "set");
                        tracing::warn!(cache = %self.name, key = %pkey, error = %e, "failed to write partial result");
                    }
                }
                Err(e) => {
                    tracing::warn!(cache = %self.name, key = %pkey, error = %e, "failed to encode partial result");
                }
            }
        }

        tracing::debug!(key = %pkey, rows = kept, "partial result cached");
        kept
    }

    /// Rows stored under `key`, local first, then the shared tier.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<Vec<T>> {
        if !self.enabled {
            return None;
        }
        let pkey = self.keys.partial_key(key);

        let cached = match self.local.lock().get(&pkey) {
            Lookup::Hit(entry) => Some(entry.value.clone()),
            Lookup::Expired | Lookup::Missing => None,
        };
        let rows = match cached {
            Some(rows) => rows,
            None => self.get_remote(&pkey).await?,
        };

        rows.into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<T>, _>>()
            .map_err(|e| {
                tracing::warn!(cache = %self.name, key = %pkey, error = %e, "partial rows have unexpected shape, treating as miss");
            })
            .ok()
    }

    async fn get_remote(&self, pkey: &str) -> Option<Vec<Value>> {
        let remote = self.remote.as_ref()?;
        let raw = match remote.get(pkey).await {
            Ok(raw) => raw?,
            Err(e) => {
                metrics::record_remote_error(&self.name, "get");
                tracing::warn!(cache = %self.name, key = %pkey, error = %e, "failed to read partial result");
                return None;
            }
        };
        let payload: PartialPayload = match serde_json::from_str(&raw) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(cache = %self.name, key = %pkey, error = %e, "failed to parse partial result");
                return None;
            }
        };
        let remaining = payload.remaining_ttl()?;

        let size = payload.rows.iter().map(json_size).sum();
        self.local
            .lock()
            .insert(pkey, payload.rows.clone(), remaining, size);
        Some(payload.rows)
    }

    /// Drop partial entries for `keys` from both tiers.
    pub async fn remove(&self, keys: &[String]) {
        if keys.is_empty() {
            return;
        }
        let pkeys: Vec<String> = keys.iter().map(|key| self.keys.partial_key(key)).collect();
        {
            let mut local = self.local.lock();
            for pkey in &pkeys {
                local.remove(pkey);
            }
        }
        if let Some(remote) = &self.remote {
            if let Err(e) = remote.delete(&pkeys).await {
                metrics::record_remote_error(&self.name, "delete");
                tracing::warn!(cache = %self.name, keys = pkeys.len(), error = %e, "failed to delete partial results");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.local.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.local.lock().is_empty()
    }

    pub fn clear_local(&self) {
        self.local.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{MemoryTier, RemoteTier};
    use std::sync::Arc;

    fn config(limit: usize) -> CacheConfig {
        CacheConfig {
            partial_limit: limit,
            ..CacheConfig::default()
        }
    }

    #[tokio::test]
    async fn rows_are_truncated_to_limit() {
        let partial = PartialCache::new("query", &config(3), None);
        let rows: Vec<u32> = (0..10).collect();

        assert_eq!(partial.set("q", &rows).await, 3);
        assert_eq!(partial.get::<u32>("q").await, Some(vec![0, 1, 2]));
    }

    #[tokio::test]
    async fn short_input_is_kept_whole() {
        let partial = PartialCache::new("query", &config(5), None);
        assert_eq!(partial.set("q", &["a", "b"]).await, 2);
        assert_eq!(
            partial.get::<String>("q").await,
            Some(vec!["a".to_string(), "b".to_string()])
        );
    }

    #[tokio::test]
    async fn entries_expire_on_streaming_ttl() {
        let partial = PartialCache::new("query", &config(5), None);
        let partial = PartialCache {
            ttl: Duration::from_millis(50),
            ..partial
        };
        partial.set("q", &[1]).await;

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(partial.get::<u32>("q").await, None);
    }

    #[tokio::test]
    async fn writes_through_to_shared_tier() {
        let remote = MemoryTier::new();
        let writer = PartialCache::new("query", &config(2), Some(Arc::new(remote.clone())));
        let reader = PartialCache::new("query", &config(2), Some(Arc::new(remote.clone())));

        writer.set("q", &[1, 2, 3]).await;
        let raw = remote.get("strata#partial:q").await.unwrap().unwrap();
        let payload: PartialPayload = serde_json::from_str(&raw).unwrap();
        assert_eq!(payload.rows.len(), 2);

        assert_eq!(reader.get::<u32>("q").await, Some(vec![1, 2]));
        assert_eq!(reader.len(), 1);
    }

    #[tokio::test]
    async fn remove_drops_both_tiers() {
        let remote = MemoryTier::new();
        let partial = PartialCache::new("query", &config(2), Some(Arc::new(remote.clone())));
        partial.set("q", &[1]).await;

        partial.remove(&["q".to_string()]).await;
        assert!(partial.is_empty());
        assert_eq!(remote.get("strata#partial:q").await.unwrap(), None);
    }

    #[tokio::test]
    async fn disabled_is_a_no_op() {
        let config = CacheConfig {
            cache_enabled: false,
            ..CacheConfig::default()
        };
        let partial = PartialCache::new("query", &config, None);

        assert_eq!(partial.set("q", &[1]).await, 0);
        assert_eq!(partial.get::<u32>("q").await, None);
    }
}
