//! Query-result cache: a [`TieredCache`] evicting by access frequency, plus a
//! partial-result side table for progressive delivery.
//!
//! Keys are usually produced by [`QueryCache::fingerprint`] so that the same
//! query text and parameters always land on the same entry.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::config::CacheConfig;
use crate::error::CacheResult;
use crate::facade::{CacheStats, TieredCache};
use crate::local::EvictionPolicy;
use crate::partial::PartialCache;
use crate::remote::DynRemote;

#[derive(Clone)]
pub struct QueryCache {
    cache: TieredCache,
    partial: Arc<PartialCache>,
}

impl QueryCache {
    /// Build a query cache over `max_entries` local slots.
    pub async fn new(config: CacheConfig, remote: Option<DynRemote>) -> CacheResult<Self> {
        let partial = PartialCache::new("query_partial", &config, remote.clone());
        let cache = TieredCache::builder(config.clone())
            .name("query")
            .policy(EvictionPolicy::Lfu {
                max_entries: config.max_entries,
            })
            .maybe_remote(remote)
            .build()
            .await?;

        Ok(Self {
            cache,
            partial: Arc::new(partial),
        })
    }

    /// Stable cache key for a query and its parameters.
    ///
    /// Parameters are canonicalised first (object keys sorted), so `{"a":1,"b":2}`
    /// and `{"b":2,"a":1}` give the same key.
    pub fn fingerprint(query: &str, params: &Value) -> String {
        let mut hasher = Sha256::new();
        hasher.update(query.as_bytes());
        hasher.update([0u8]);
        hasher.update(canonical_json(params).as_bytes());
        format!("query:{}", hex::encode(hasher.finalize()))
    }

    pub fn inner(&self) -> &TieredCache {
        &self.cache
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.cache.get(key).await
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>, tags: &[&str]) {
        self.cache.set(key, value, ttl, tags).await
    }

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
        self.cache.wrap(key, ttl, tags, factory).await
    }

    /// Invalidate the full result and any partial result for `key`.
    pub async fn invalidate(&self, key: &str) {
        self.cache.invalidate(key).await;
        self.partial.remove(&[key.to_string()]).await;
    }

    /// Invalidate every result tagged `tag`, including their partial results.
    pub async fn invalidate_by_tag(&self, tag: &str) -> Vec<String> {
        let keys = self.cache.invalidate_by_tag(tag).await;
        self.partial.remove(&keys).await;
        keys
    }

    /// Cache the first `partial_limit` rows of a result still being produced.
    pub async fn set_partial<T: Serialize>(&self, key: &str, rows: &[T]) -> usize {
        self.partial.set(key, rows).await
    }

    pub async fn get_partial<T: DeserializeOwned>(&self, key: &str) -> Option<Vec<T>> {
        self.partial.get(key).await
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn partial_len(&self) -> usize {
        self.partial.len()
    }

    pub fn clear_local(&self) {
        self.cache.clear_local();
        self.partial.clear_local();
    }

    pub async fn shutdown(&self) {
        self.cache.shutdown().await;
    }
}

fn canonical_json(value: &Value) -> String {
    fn sorted(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut entries: Vec<_> = map.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                Value::Object(
                    entries
                        .into_iter()
                        .map(|(k, v)| (k.clone(), sorted(v)))
                        .collect(),
                )
            }
            Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
            other => other.clone(),
        }
    }
    sorted(value).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryTier;
    use serde_json::json;

    #[test]
    fn fingerprint_ignores_param_order() {
        let a = QueryCache::fingerprint("SELECT 1", &json!({"a": 1, "b": {"y": 2, "x": 1}}));
        let b = QueryCache::fingerprint("SELECT 1", &json!({"b": {"x": 1, "y": 2}, "a": 1}));
        assert_eq!(a, b);
        assert!(a.starts_with("query:"));
        assert_eq!(a.len(), "query:".len() + 64);
    }

    #[test]
    fn fingerprint_distinguishes_query_and_params() {
        let base = QueryCache::fingerprint("SELECT 1", &json!([1]));
        assert_ne!(base, QueryCache::fingerprint("SELECT 2", &json!([1])));
        assert_ne!(base, QueryCache::fingerprint("SELECT 1", &json!([2])));
    }

    #[tokio::test]
    async fn lfu_keeps_frequently_read_results() {
        let cache = QueryCache::new(
            CacheConfig {
                max_entries: 2,
                ..CacheConfig::default()
            },
            None,
        )
        .await
        .unwrap();

        cache.set("hot", &1, None, &[]).await;
        cache.set("cold", &2, None, &[]).await;
        for _ in 0..3 {
            assert_eq!(cache.get::<i32>("hot").await, Some(1));
        }
        cache.set("new", &3, None, &[]).await;

        assert_eq!(cache.get::<i32>("hot").await, Some(1));
        assert_eq!(cache.get::<i32>("cold").await, None);
        assert_eq!(cache.get::<i32>("new").await, Some(3));
        assert_eq!(cache.stats().evicted, 1);
    }

    #[tokio::test]
    async fn partial_results_do_not_clobber_value_keys() {
        let remote = MemoryTier::new();
        let cache = QueryCache::new(CacheConfig::default(), Some(Arc::new(remote.clone())))
            .await
            .unwrap();

        cache.set("partial:q", &json!({"full": true}), None, &[]).await;
        cache.set_partial("q", &[1, 2]).await;
        cache.clear_local();

        assert_eq!(
            cache.get::<Value>("partial:q").await,
            Some(json!({"full": true}))
        );
        assert_eq!(cache.get_partial::<i32>("q").await, Some(vec![1, 2]));
    }

    #[tokio::test]
    async fn invalidate_drops_partial_result() {
        let cache = QueryCache::new(CacheConfig::default(), None).await.unwrap();
        cache.set("q", &vec![1, 2, 3], None, &["reports"]).await;
        cache.set_partial("q", &[1, 2]).await;

        cache.invalidate("q").await;
        assert_eq!(cache.get::<Vec<i32>>("q").await, None);
        assert_eq!(cache.get_partial::<i32>("q").await, None);
    }

    #[tokio::test]
    async fn tag_invalidation_drops_partial_results() {
        let cache = QueryCache::new(CacheConfig::default(), None).await.unwrap();
        cache.set("q1", &1, None, &["reports"]).await;
        cache.set("q2", &2, None, &["reports"]).await;
        cache.set_partial("q1", &[1]).await;
        cache.set_partial("q2", &[2]).await;

        let mut keys = cache.invalidate_by_tag("reports").await;
        keys.sort();
        assert_eq!(keys, vec!["q1".to_string(), "q2".to_string()]);
        assert_eq!(cache.partial_len(), 0);
    }
}
