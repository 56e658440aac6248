//! Shared (L2) tier contract.
//!
//! The cache core consumes this narrow interface and never owns the store.
//! Two implementations ship with the crate:
//!
//! - [`RedisTier`]: Redis via a `deadpool-redis` pool, pub/sub on a dedicated connection
//! - [`MemoryTier`]: in-process store shared by handle, for single-binary
//!   deployments and tests that need several cache instances on one tier

pub mod memory;
pub mod redis;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::RemoteError;

pub use self::memory::MemoryTier;
pub use self::redis::{RedisTier, connect_redis};

/// Stream of raw payloads received on a subscribed channel.
pub type MessageStream = BoxStream<'static, String>;

/// Shared handle to a remote tier.
pub type DynRemote = Arc<dyn RemoteTier>;

/// Operations the cache needs from the shared key-value store.
///
/// Implementations decide their own timeouts. The cache never retries a
/// failed call; it logs and carries on with the local tier only.
#[async_trait]
pub trait RemoteTier: Send + Sync {
    /// Short backend name for logs and stats ("redis", "memory").
    fn kind(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<String>, RemoteError>;

    /// Store `value` under `key`, expiring after `ttl`.
    async fn set_with_ttl(&self, key: &str, ttl: Duration, value: &str)
    -> Result<(), RemoteError>;

    /// Delete keys, returning how many existed.
    async fn delete(&self, keys: &[String]) -> Result<u64, RemoteError>;

    /// Add members to a set, returning how many were new.
    async fn add_to_set(&self, set_key: &str, members: &[String]) -> Result<u64, RemoteError>;

    async fn members_of_set(&self, set_key: &str) -> Result<Vec<String>, RemoteError>;

    /// Remove a member from a set, returning how many were removed (0 or 1).
    async fn remove_from_set(&self, set_key: &str, member: &str) -> Result<u64, RemoteError>;

    /// Set a key's expiry. Returns false if the key does not exist.
    async fn set_ttl(&self, key: &str, ttl: Duration) -> Result<bool, RemoteError>;

    /// Publish a payload, returning the number of receivers.
    async fn publish(&self, channel: &str, payload: &str) -> Result<u64, RemoteError>;

    /// Subscribe to a channel.
    ///
    /// The implementation opens whatever dedicated connection it needs; a
    /// connection blocked on a subscription cannot issue commands. The stream
    /// ends when that connection is lost.
    async fn subscribe(&self, channel: &str) -> Result<MessageStream, RemoteError>;

    /// Health check.
    async fn ping(&self) -> Result<(), RemoteError>;
}
