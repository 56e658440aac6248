//! Integration tests for the two-tier cache against an in-process shared tier.
//!
//! Cross-instance tests build two caches over one `MemoryTier`, which plays
//! the role of a Redis deployment shared by two processes.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use strata_cache::{
    CacheConfig, CacheError, EvictionPolicy, MemoryTier, QueryCache, RemoteTier, TieredCache,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct User {
    id: String,
    name: String,
}

fn user(id: &str) -> User {
    User {
        id: id.to_string(),
        name: format!("user {id}"),
    }
}

async fn instance(remote: &MemoryTier) -> TieredCache {
    instance_with(remote, CacheConfig::default()).await
}

async fn instance_with(remote: &MemoryTier, config: CacheConfig) -> TieredCache {
    TieredCache::builder(config)
        .remote(Arc::new(remote.clone()))
        .build()
        .await
        .expect("build cache")
}

/// Give the listener task a moment to apply published messages.
async fn deliver() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn test_set_get_and_expiry_in_both_tiers() {
    let remote = MemoryTier::new();
    let cache = instance(&remote).await;

    cache
        .set("user:1", &user("1"), Some(Duration::from_millis(200)), &[])
        .await;
    assert_eq!(cache.get::<User>("user:1").await, Some(user("1")));

    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(cache.get::<User>("user:1").await, None);
    assert_eq!(remote.get("strata:user:1").await.unwrap(), None);
}

#[tokio::test]
async fn test_repeated_get_is_stable() {
    let remote = MemoryTier::new();
    let cache = instance(&remote).await;
    cache.set("k", &json!({"a": [1, 2]}), None, &[]).await;

    let first = cache.get::<Value>("k").await;
    for _ in 0..5 {
        assert_eq!(cache.get::<Value>("k").await, first);
    }
    assert_eq!(cache.stats().l1_hits, 6);
}

#[tokio::test]
async fn test_wrap_runs_factory_once_for_concurrent_callers() {
    let remote = MemoryTier::new();
    let cache = instance(&remote).await;
    let calls = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let cache = cache.clone();
        let calls = Arc::clone(&calls);
        handles.push(tokio::spawn(async move {
            cache
                .wrap("heavy", None, &[], move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok(user("heavy"))
                })
                .await
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), user("heavy"));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.get::<User>("heavy").await, Some(user("heavy")));
    assert!(remote.get("strata:heavy").await.unwrap().is_some());
    assert_eq!(cache.stats().in_flight, 0);
}

#[tokio::test]
async fn test_wrap_failure_allows_retry() {
    let remote = MemoryTier::new();
    let cache = instance(&remote).await;

    let err = cache
        .wrap::<User, _, _>("flaky", None, &[], || async {
            Err(anyhow::anyhow!("backend timeout"))
        })
        .await
        .unwrap_err();
    match err {
        CacheError::Factory(e) => assert_eq!(e.to_string(), "backend timeout"),
        other => panic!("unexpected error: {other}"),
    }

    let value = cache
        .wrap("flaky", None, &[], || async { Ok(user("2")) })
        .await
        .unwrap();
    assert_eq!(value, user("2"));
}

#[tokio::test]
async fn test_timed_out_wrap_still_populates_shared_tier() {
    let remote = MemoryTier::new();
    let cache = instance(&remote).await;
    let calls = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&calls);
    let timed_out = tokio::time::timeout(
        Duration::from_millis(20),
        cache.wrap("slow", None, &["reports"], move || async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(user("slow"))
        }),
    )
    .await;
    assert!(timed_out.is_err());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.stats().in_flight, 0);
    assert!(remote.get("strata:slow").await.unwrap().is_some());

    // A fresh caller is served from cache, not by a second factory run.
    let value = cache
        .wrap::<User, _, _>("slow", None, &[], || async {
            Err(anyhow::anyhow!("should not run"))
        })
        .await
        .unwrap();
    assert_eq!(value, user("slow"));
}

#[tokio::test]
async fn test_invalidate_clears_remote_tag_set() {
    let remote = MemoryTier::new();
    let cache = instance(&remote).await;

    cache
        .set("entity:1", &json!({"id": 1}), None, &["entities"])
        .await;
    assert_eq!(
        remote.members_of_set("strata:tag:entities").await.unwrap(),
        vec!["strata:entity:1".to_string()]
    );

    cache.invalidate("entity:1").await;

    assert_eq!(cache.get::<Value>("entity:1").await, None);
    assert!(
        remote
            .members_of_set("strata:tag:entities")
            .await
            .unwrap()
            .is_empty()
    );
    assert_eq!(remote.get("strata:entity:1").await.unwrap(), None);
}

#[tokio::test]
async fn test_invalidate_keeps_other_tag_members() {
    let remote = MemoryTier::new();
    let cache = instance(&remote).await;
    cache.set("e:1", &1, None, &["list"]).await;
    cache.set("e:2", &2, None, &["list"]).await;

    cache.invalidate("e:1").await;

    assert_eq!(
        remote.members_of_set("strata:tag:list").await.unwrap(),
        vec!["strata:e:2".to_string()]
    );
    assert_eq!(cache.get::<i32>("e:2").await, Some(2));
}

#[tokio::test]
async fn test_tag_fan_out() {
    let remote = MemoryTier::new();
    let cache = instance(&remote).await;
    cache.set("e:1", &"v1", None, &["list"]).await;
    cache.set("e:2", &"v2", None, &["list", "other"]).await;
    cache.set("e:3", &"v3", None, &["other"]).await;

    let mut invalidated = cache.invalidate_by_tag("list").await;
    invalidated.sort();

    assert_eq!(invalidated, vec!["e:1".to_string(), "e:2".to_string()]);
    assert_eq!(cache.get::<String>("e:1").await, None);
    assert_eq!(cache.get::<String>("e:2").await, None);
    assert_eq!(cache.get::<String>("e:3").await.as_deref(), Some("v3"));
    assert!(
        remote
            .members_of_set("strata:tag:list")
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_cross_instance_invalidation() {
    let remote = MemoryTier::new();
    let a = instance(&remote).await;
    let b = instance(&remote).await;

    a.set("k", &user("1"), None, &[]).await;
    assert_eq!(b.get::<User>("k").await, Some(user("1")));
    assert!(b.contains_local("k"));

    a.invalidate("k").await;
    deliver().await;

    assert!(!b.contains_local("k"));
    assert_eq!(b.get::<User>("k").await, None);
}

#[tokio::test]
async fn test_cross_instance_set_replaces_peer_copy() {
    let remote = MemoryTier::new();
    let a = instance(&remote).await;
    let b = instance(&remote).await;

    a.set("k", &1, None, &[]).await;
    assert_eq!(b.get::<i32>("k").await, Some(1));

    a.set("k", &2, None, &[]).await;
    deliver().await;

    assert_eq!(b.get::<i32>("k").await, Some(2));
    // The writer's own copy survives its own message.
    assert!(a.contains_local("k"));
}

#[tokio::test]
async fn test_cross_instance_tag_invalidation() {
    let remote = MemoryTier::new();
    let a = instance(&remote).await;
    let b = instance(&remote).await;

    a.set("e:1", &1, None, &["list"]).await;
    a.set("e:2", &2, None, &["list"]).await;
    assert_eq!(b.get::<i32>("e:1").await, Some(1));
    assert_eq!(b.get::<i32>("e:2").await, Some(2));

    b.invalidate_by_tag("list").await;
    deliver().await;

    assert!(!a.contains_local("e:1"));
    assert!(!a.contains_local("e:2"));
    assert!(a.local_keys_for_tag("list").is_empty());
}

#[tokio::test]
async fn test_peer_without_listener_keeps_stale_copy_until_fallback_ttl() {
    let remote = MemoryTier::new();
    let a = instance(&remote).await;
    let b = TieredCache::builder(CacheConfig {
        l1_fallback_ttl_secs: 1,
        ..CacheConfig::default()
    })
    .remote(Arc::new(remote.clone()))
    .subscribe(false)
    .build()
    .await
    .unwrap();

    a.set("k", &1, None, &[]).await;
    assert_eq!(b.get::<i32>("k").await, Some(1));

    a.set("k", &2, None, &[]).await;
    deliver().await;
    assert_eq!(b.get::<i32>("k").await, Some(1));

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(b.get::<i32>("k").await, Some(2));
}

#[tokio::test]
async fn test_admission_control() {
    let remote = MemoryTier::new();
    let cache = TieredCache::builder(CacheConfig::default())
        .policy(EvictionPolicy::SizeLru { max_bytes: 64 })
        .remote(Arc::new(remote.clone()))
        .build()
        .await
        .unwrap();

    let large = "x".repeat(200);
    cache.set("large", &large, None, &[]).await;

    assert!(!cache.contains_local("large"));
    assert_eq!(cache.stats().entries, 0);
    assert_eq!(cache.stats().rejected, 1);
    // Still served from the shared tier, and still refused locally.
    assert_eq!(cache.get::<String>("large").await, Some(large));
    assert_eq!(cache.stats().entries, 0);
}

#[tokio::test]
async fn test_size_budget_evicts_oldest() {
    let cache = TieredCache::builder(CacheConfig::default())
        .policy(EvictionPolicy::SizeLru { max_bytes: 30 })
        .build()
        .await
        .unwrap();

    // Each value serializes to 12 bytes.
    cache.set("a", &"aaaaaaaaaa", None, &["t"]).await;
    cache.set("b", &"bbbbbbbbbb", None, &["t"]).await;
    cache.set("c", &"cccccccccc", None, &["t"]).await;

    assert!(!cache.contains_local("a"));
    assert!(cache.contains_local("b"));
    assert!(cache.contains_local("c"));
    assert_eq!(cache.stats().evicted, 1);
    let mut tagged = cache.local_keys_for_tag("t");
    tagged.sort();
    assert_eq!(tagged, vec!["b".to_string(), "c".to_string()]);
}

#[tokio::test]
async fn test_streaming_trim() {
    let remote = MemoryTier::new();
    let cache = QueryCache::new(
        CacheConfig {
            partial_limit: 5,
            ..CacheConfig::default()
        },
        Some(Arc::new(remote.clone())),
    )
    .await
    .unwrap();

    let rows: Vec<Value> = (0..20).map(|i| json!({"row": i})).collect();
    let key = QueryCache::fingerprint("SELECT * FROM t", &json!({}));

    assert_eq!(cache.set_partial(&key, &rows).await, 5);
    let partial = cache.get_partial::<Value>(&key).await.unwrap();
    assert_eq!(partial, rows[..5].to_vec());
}

#[tokio::test]
async fn test_remote_outage_degrades_to_local() {
    let remote = MemoryTier::new();
    let cache = instance(&remote).await;
    remote.set_available(false);

    cache.set("k", &user("1"), None, &["users"]).await;
    assert_eq!(cache.get::<User>("k").await, Some(user("1")));
    assert!(!cache.is_remote_available().await);

    let value = cache
        .wrap("w", None, &[], || async { Ok(7) })
        .await
        .unwrap();
    assert_eq!(value, 7);

    cache.invalidate("k").await;
    assert_eq!(cache.get::<User>("k").await, None);

    remote.set_available(true);
    assert!(cache.is_remote_available().await);
    assert_eq!(remote.key_count(), 0);
}

#[tokio::test]
async fn test_kill_switch_disables_storage() {
    let remote = MemoryTier::new();
    let cache = instance_with(
        &remote,
        CacheConfig {
            cache_enabled: false,
            ..CacheConfig::default()
        },
    )
    .await;
    let calls = Arc::new(AtomicUsize::new(0));

    for _ in 0..2 {
        let calls = Arc::clone(&calls);
        let value = cache
            .wrap("k", None, &[], move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            })
            .await
            .unwrap();
        assert_eq!(value, 1);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(cache.get::<i32>("k").await, None);
    assert_eq!(remote.key_count(), 0);
}

#[tokio::test]
async fn test_namespaces_are_isolated() {
    let remote = MemoryTier::new();
    let orders = instance_with(
        &remote,
        CacheConfig {
            namespace: "orders".into(),
            ..CacheConfig::default()
        },
    )
    .await;
    let users = instance_with(
        &remote,
        CacheConfig {
            namespace: "users".into(),
            ..CacheConfig::default()
        },
    )
    .await;

    orders.set("1", &"order", None, &[]).await;
    assert_eq!(users.get::<String>("1").await, None);
    assert!(remote.get("orders:1").await.unwrap().is_some());
}
