//! In-flight request deduplication.
//!
//! At most one factory runs per key at a time within a process. Concurrent
//! callers for the same key await one shared future and receive clones of its
//! result, error included.
//!
//! The factory runs on its own task, so it completes even when every caller
//! has been dropped (a timed-out request, say). A drop guard owned by that
//! task removes the slot on success, failure and panic alike, and before any
//! waiter observes the result.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};

/// Error shared by every waiter on a failed slot.
pub type SharedError = Arc<anyhow::Error>;

type Slot<V> = Shared<BoxFuture<'static, Result<V, SharedError>>>;

pub struct Singleflight<V> {
    slots: Arc<DashMap<String, Slot<V>>>,
}

impl<V> Default for Singleflight<V> {
    fn default() -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
        }
    }
}

/// Removes a slot when dropped.
struct SlotGuard<V> {
    slots: Arc<DashMap<String, Slot<V>>>,
    key: String,
}

impl<V> Drop for SlotGuard<V> {
    fn drop(&mut self) {
        self.slots.remove(&self.key);
    }
}

impl<V> Singleflight<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `factory` for `key` unless a run is already in flight, in which
    /// case join it.
    ///
    /// The check-and-insert happens under the map's shard lock and before
    /// anything is awaited, so two callers can never both start a factory.
    pub async fn run<F, Fut>(&self, key: &str, factory: F) -> Result<V, SharedError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        let slot = match self.slots.entry(key.to_string()) {
            Entry::Occupied(existing) => {
                tracing::debug!(key = %key, "joining in-flight population");
                existing.get().clone()
            }
            Entry::Vacant(vacant) => {
                let guard = SlotGuard {
                    slots: Arc::clone(&self.slots),
                    key: key.to_string(),
                };
                let work = factory();
                let task = tokio::spawn(async move {
                    let _guard = guard;
                    work.await.map_err(Arc::new)
                });
                let slot = async move {
                    match task.await {
                        Ok(result) => result,
                        Err(e) => Err(Arc::new(anyhow::anyhow!("population task failed: {e}"))),
                    }
                }
                .boxed()
                .shared();
                vacant.insert(slot.clone());
                slot
            }
        };

        slot.await
    }

    /// Number of keys currently being populated.
    pub fn in_flight(&self) -> usize {
        self.slots.len()
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.slots.contains_key(key)
    }
}
