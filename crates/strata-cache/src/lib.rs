//! # strata-cache
//!
//! Multi-tier cache: a bounded process-local tier in front of a shared tier
//! (Redis), kept consistent across instances without a central lock.
//!
//! ## Overview
//!
//! - [`TieredCache`]: get / set / wrap / invalidate / invalidate_by_tag over
//!   both tiers, with tag indexes on each side
//! - [`InvalidationBus`]: pub/sub fan-out of invalidations to peer instances
//! - [`Singleflight`]: concurrent misses for one key compute once
//! - [`QueryCache`]: frequency-evicting instantiation for query results,
//!   with a short-lived [`PartialCache`] for progressive delivery
//!
//! Shared tier failures never fail a call; the cache degrades to local-only.
//!
//! ## Example
//!
//! ```ignore
//! use strata_cache::{CacheConfig, DynRemote, RedisConfig, TieredCache, connect_redis};
//!
//! let remote = connect_redis(&RedisConfig::default()).await;
//! let cache = TieredCache::builder(CacheConfig::default())
//!     .maybe_remote(remote.map(|r| Arc::new(r) as DynRemote))
//!     .build()
//!     .await?;
//!
//! let user: User = cache
//!     .wrap("user:42", None, &["users"], move || async move { load_user(42).await })
//!     .await?;
//! cache.invalidate_by_tag("users").await;
//! ```

pub mod bus;
pub mod config;
pub mod error;
pub mod facade;
pub mod keys;
pub mod local;
pub mod metrics;
pub mod observability;
pub mod partial;
pub mod payload;
pub mod query;
pub mod remote;
pub mod singleflight;

pub use bus::{InvalidationBus, InvalidationMessage, Subscription};
pub use config::{CacheConfig, RedisConfig, StrataConfig};
pub use error::{CacheError, CacheResult, RemoteError};
pub use facade::{CacheStats, TieredCache, TieredCacheBuilder};
pub use keys::KeySpace;
pub use local::{EvictionPolicy, LocalTier};
pub use partial::PartialCache;
pub use payload::CachedPayload;
pub use query::QueryCache;
pub use remote::{DynRemote, MemoryTier, RedisTier, RemoteTier, connect_redis};
pub use singleflight::Singleflight;
