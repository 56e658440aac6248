//! In-process shared tier.
//!
//! Mirrors the subset of Redis semantics the cache relies on: string values
//! and sets with millisecond expiry, empty sets disappearing, and fan-out
//! pub/sub. Clones share the same store, so several cache instances built on
//! clones of one `MemoryTier` behave like processes sharing one Redis.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use parking_lot::Mutex;
use tokio::sync::broadcast;

use super::{MessageStream, RemoteTier};
use crate::config::clamp_ttl;
use crate::error::RemoteError;

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
enum Stored {
    Str(String),
    Set(BTreeSet<String>),
}

#[derive(Debug)]
struct Slot {
    value: Stored,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

#[derive(Default)]
struct Inner {
    data: Mutex<HashMap<String, Slot>>,
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
    unavailable: AtomicBool,
}

#[derive(Clone, Default)]
pub struct MemoryTier {
    inner: Arc<Inner>,
}

impl MemoryTier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: while unavailable every call fails with a
    /// connection error and nothing is published.
    pub fn set_available(&self, available: bool) {
        self.inner.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Number of live keys.
    pub fn key_count(&self) -> usize {
        let now = Instant::now();
        self.inner
            .data
            .lock()
            .values()
            .filter(|slot| slot.is_live(now))
            .count()
    }

    fn check(&self) -> Result<(), RemoteError> {
        if self.inner.unavailable.load(Ordering::SeqCst) {
            return Err(RemoteError::Connection("memory tier unavailable".into()));
        }
        Ok(())
    }

    /// Run `f` against the store after dropping expired slots.
    fn with_data<R>(&self, f: impl FnOnce(&mut HashMap<String, Slot>) -> R) -> Result<R, RemoteError> {
        self.check()?;
        let mut data = self.inner.data.lock();
        let now = Instant::now();
        data.retain(|_, slot| slot.is_live(now));
        Ok(f(&mut data))
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        self.inner
            .channels
            .lock()
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

fn wrong_type(op: &'static str) -> RemoteError {
    RemoteError::command(
        op,
        "WRONGTYPE Operation against a key holding the wrong kind of value",
    )
}

#[async_trait]
impl RemoteTier for MemoryTier {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, RemoteError> {
        self.with_data(|data| match data.get(key) {
            None => Ok(None),
            Some(Slot {
                value: Stored::Str(s),
                ..
            }) => Ok(Some(s.clone())),
            Some(_) => Err(wrong_type("GET")),
        })?
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        ttl: Duration,
        value: &str,
    ) -> Result<(), RemoteError> {
        self.with_data(|data| {
            data.insert(
                key.to_string(),
                Slot {
                    value: Stored::Str(value.to_string()),
                    expires_at: Some(Instant::now() + clamp_ttl(ttl)),
                },
            );
        })
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, RemoteError> {
        self.with_data(|data| keys.iter().filter(|k| data.remove(*k).is_some()).count() as u64)
    }

    async fn add_to_set(&self, set_key: &str, members: &[String]) -> Result<u64, RemoteError> {
        self.with_data(|data| {
            let slot = data.entry(set_key.to_string()).or_insert_with(|| Slot {
                value: Stored::Set(BTreeSet::new()),
                expires_at: None,
            });
            match &mut slot.value {
                Stored::Set(set) => Ok(members
                    .iter()
                    .filter(|m| set.insert((*m).clone()))
                    .count() as u64),
                Stored::Str(_) => Err(wrong_type("SADD")),
            }
        })?
    }

    async fn members_of_set(&self, set_key: &str) -> Result<Vec<String>, RemoteError> {
        self.with_data(|data| match data.get(set_key) {
            None => Ok(Vec::new()),
            Some(Slot {
                value: Stored::Set(set),
                ..
            }) => Ok(set.iter().cloned().collect()),
            Some(_) => Err(wrong_type("SMEMBERS")),
        })?
    }

    async fn remove_from_set(&self, set_key: &str, member: &str) -> Result<u64, RemoteError> {
        self.with_data(|data| {
            let (removed, now_empty) = match data.get_mut(set_key) {
                None => return Ok(0),
                Some(Slot {
                    value: Stored::Set(set),
                    ..
                }) => (set.remove(member), set.is_empty()),
                Some(_) => return Err(wrong_type("SREM")),
            };
            if now_empty {
                data.remove(set_key);
            }
            Ok(removed as u64)
        })?
    }

    async fn set_ttl(&self, key: &str, ttl: Duration) -> Result<bool, RemoteError> {
        self.with_data(|data| match data.get_mut(key) {
            Some(slot) => {
                slot.expires_at = Some(Instant::now() + clamp_ttl(ttl));
                true
            }
            None => false,
        })
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<u64, RemoteError> {
        self.check()?;
        // send() only fails when there are no receivers
        let receivers = self.sender(channel).send(payload.to_string()).unwrap_or(0);
        Ok(receivers as u64)
    }

    async fn subscribe(&self, channel: &str) -> Result<MessageStream, RemoteError> {
        self.check()?;
        let rx = self.sender(channel).subscribe();
        let channel = channel.to_string();

        let stream = stream::unfold(rx, move |mut rx| {
            let channel = channel.clone();
            async move {
                loop {
                    match rx.recv().await {
                        Ok(payload) => return Some((payload, rx)),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(channel = %channel, skipped, "subscriber lagged, messages dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        })
        .boxed();

        Ok(stream)
    }

    async fn ping(&self) -> Result<(), RemoteError> {
        self.check()
    }
}
