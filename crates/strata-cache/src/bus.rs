//! Cross-instance invalidation over the shared tier's pub/sub channel.
//!
//! ## Flow
//!
//! ```text
//! Instance A: set("k") / invalidate("k")
//!   ↓
//! PUBLISH cache:invalidate {"type":"key","keys":["ns:k"],"origin":"A"}
//!   ↓
//! Instance B: listener receives → evicts ns:k from its L1 and tag index
//! Instance A: listener receives → own origin, ignored
//! ```
//!
//! Tag invalidations carry the member keys already resolved by the sender,
//! so receivers never query the tag index themselves. Receivers treat both
//! message types the same way; the type only feeds metrics and logs.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::metrics;
use crate::remote::{DynRemote, MessageStream};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Payload published on the invalidation channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InvalidationMessage {
    Key {
        keys: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        origin: Option<String>,
    },
    Tag {
        tag: String,
        keys: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        origin: Option<String>,
    },
}

impl InvalidationMessage {
    pub fn keys(&self) -> &[String] {
        match self {
            InvalidationMessage::Key { keys, .. } | InvalidationMessage::Tag { keys, .. } => keys,
        }
    }

    pub fn origin(&self) -> Option<&str> {
        match self {
            InvalidationMessage::Key { origin, .. } | InvalidationMessage::Tag { origin, .. } => {
                origin.as_deref()
            }
        }
    }

    /// `"key"` or `"tag"`.
    pub fn kind(&self) -> &'static str {
        match self {
            InvalidationMessage::Key { .. } => "key",
            InvalidationMessage::Tag { .. } => "tag",
        }
    }
}

type Handler = Arc<dyn Fn(InvalidationMessage) + Send + Sync>;

/// Publishes and receives invalidation messages for one cache instance.
#[derive(Clone)]
pub struct InvalidationBus {
    remote: DynRemote,
    channel: String,
    origin: String,
    cache: String,
}

impl InvalidationBus {
    /// `origin` identifies this instance; messages carrying it are not
    /// delivered back to it. `cache` labels logs and metrics.
    pub fn new(
        remote: DynRemote,
        channel: impl Into<String>,
        origin: impl Into<String>,
        cache: impl Into<String>,
    ) -> Self {
        Self {
            remote,
            channel: channel.into(),
            origin: origin.into(),
            cache: cache.into(),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn key_message(&self, keys: Vec<String>) -> InvalidationMessage {
        InvalidationMessage::Key {
            keys,
            origin: Some(self.origin.clone()),
        }
    }

    pub fn tag_message(&self, tag: &str, keys: Vec<String>) -> InvalidationMessage {
        InvalidationMessage::Tag {
            tag: tag.to_string(),
            keys,
            origin: Some(self.origin.clone()),
        }
    }

    /// Publish a message. Failures are logged and swallowed.
    pub async fn publish(&self, message: &InvalidationMessage) {
        let payload = match serde_json::to_string(message) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize invalidation message");
                return;
            }
        };

        match self.remote.publish(&self.channel, &payload).await {
            Ok(receivers) => {
                tracing::debug!(
                    channel = %self.channel,
                    kind = message.kind(),
                    keys = message.keys().len(),
                    receivers,
                    "published invalidation"
                );
            }
            Err(e) => {
                metrics::record_remote_error(&self.cache, "publish");
                tracing::warn!(channel = %self.channel, error = %e, "failed to publish invalidation");
            }
        }
    }

    /// Start delivering peer messages to `handler`.
    ///
    /// The first subscription attempt completes before this returns, so
    /// messages published afterwards are not missed. If the stream ends or
    /// the attempt fails, the listener reconnects with exponential backoff
    /// until the returned [`Subscription`] is cancelled.
    pub async fn subscribe<H>(&self, handler: H) -> Subscription
    where
        H: Fn(InvalidationMessage) + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(handler);
        let token = CancellationToken::new();

        let first = match self.remote.subscribe(&self.channel).await {
            Ok(stream) => {
                tracing::info!(channel = %self.channel, "subscribed to invalidation channel");
                Some(stream)
            }
            Err(e) => {
                metrics::record_remote_error(&self.cache, "subscribe");
                tracing::warn!(channel = %self.channel, error = %e, "failed to subscribe, will retry");
                None
            }
        };

        let listener = Listener {
            bus: self.clone(),
            handler,
            token: token.clone(),
        };
        let handle = tokio::spawn(listener.run(first));

        Subscription {
            token,
            handle: Some(handle),
        }
    }

    fn decode(&self, payload: &str) -> Option<InvalidationMessage> {
        match serde_json::from_str::<InvalidationMessage>(payload) {
            Ok(message) => Some(message),
            Err(e) => {
                tracing::warn!(error = %e, payload = %payload, "failed to parse invalidation message");
                None
            }
        }
    }
}

struct Listener {
    bus: InvalidationBus,
    handler: Handler,
    token: CancellationToken,
}

impl Listener {
    async fn run(self, mut stream: Option<MessageStream>) {
        let mut backoff = INITIAL_BACKOFF;

        loop {
            if let Some(current) = stream.take() {
                if self.consume(current).await {
                    return;
                }
                tracing::warn!(channel = %self.bus.channel, "invalidation stream ended, reconnecting");
            }

            tokio::select! {
                _ = self.token.cancelled() => return,
                _ = tokio::time::sleep(backoff) => {}
            }

            match self.bus.remote.subscribe(&self.bus.channel).await {
                Ok(next) => {
                    tracing::info!(channel = %self.bus.channel, "resubscribed to invalidation channel");
                    backoff = INITIAL_BACKOFF;
                    stream = Some(next);
                }
                Err(e) => {
                    metrics::record_remote_error(&self.bus.cache, "subscribe");
                    tracing::error!(
                        error = %e,
                        backoff_secs = backoff.as_secs(),
                        "invalidation listener error, reconnecting..."
                    );
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }

    /// Drain a stream. Returns true when cancelled, false when the stream ended.
    async fn consume(&self, mut stream: MessageStream) -> bool {
        loop {
            let payload = tokio::select! {
                _ = self.token.cancelled() => return true,
                next = stream.next() => match next {
                    Some(payload) => payload,
                    None => return false,
                },
            };

            let Some(message) = self.bus.decode(&payload) else {
                continue;
            };
            if message.origin() == Some(self.bus.origin.as_str()) {
                continue;
            }

            tracing::debug!(
                kind = message.kind(),
                keys = message.keys().len(),
                "received invalidation"
            );
            (self.handler)(message);
        }
    }
}

/// Handle to a running invalidation listener.
///
/// Dropping the handle stops the listener; [`Subscription::unsubscribe`]
/// additionally waits for it to finish.
pub struct Subscription {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled()
            && self
                .handle
                .as_ref()
                .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the listener and wait for it to exit.
    pub async fn unsubscribe(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "invalidation listener task failed");
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{MemoryTier, RemoteTier};
    use parking_lot::Mutex;

    fn bus(remote: &MemoryTier, origin: &str) -> InvalidationBus {
        InvalidationBus::new(Arc::new(remote.clone()), "test:invalidate", origin, "test")
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[test]
    fn key_message_wire_format() {
        let message = InvalidationMessage::Key {
            keys: vec!["ns:a".into()],
            origin: None,
        };
        assert_eq!(
            serde_json::to_string(&message).unwrap(),
            r#"{"type":"key","keys":["ns:a"]}"#
        );
    }

    #[test]
    fn tag_message_wire_format() {
        let parsed: InvalidationMessage =
            serde_json::from_str(r#"{"type":"tag","tag":"list","keys":["ns:e:1","ns:e:2"]}"#)
                .unwrap();
        assert_eq!(parsed.kind(), "tag");
        assert_eq!(parsed.keys(), ["ns:e:1", "ns:e:2"]);
        assert_eq!(parsed.origin(), None);
    }

    #[tokio::test]
    async fn delivers_peer_messages_and_skips_own() {
        let remote = MemoryTier::new();
        let receiver = bus(&remote, "b");
        let sender = bus(&remote, "a");

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let subscription = receiver
            .subscribe(move |message| sink.lock().push(message))
            .await;

        sender.publish(&sender.key_message(vec!["ns:x".into()])).await;
        receiver.publish(&receiver.key_message(vec!["ns:own".into()])).await;
        settle().await;

        let seen = seen.lock().clone();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].keys(), ["ns:x"]);
        subscription.unsubscribe().await;
    }

    #[tokio::test]
    async fn ignores_malformed_payloads() {
        let remote = MemoryTier::new();
        let receiver = bus(&remote, "b");

        let count = Arc::new(Mutex::new(0usize));
        let sink = Arc::clone(&count);
        let _subscription = receiver.subscribe(move |_| *sink.lock() += 1).await;

        remote.publish("test:invalidate", "{not json").await.unwrap();
        remote
            .publish("test:invalidate", r#"{"type":"key","keys":["ns:y"]}"#)
            .await
            .unwrap();
        settle().await;

        assert_eq!(*count.lock(), 1);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let remote = MemoryTier::new();
        let receiver = bus(&remote, "b");
        let sender = bus(&remote, "a");

        let count = Arc::new(Mutex::new(0usize));
        let sink = Arc::clone(&count);
        let subscription = receiver.subscribe(move |_| *sink.lock() += 1).await;
        assert!(subscription.is_active());
        subscription.unsubscribe().await;

        sender.publish(&sender.key_message(vec!["ns:z".into()])).await;
        settle().await;
        assert_eq!(*count.lock(), 0);
    }

    #[tokio::test]
    async fn publish_failure_is_swallowed() {
        let remote = MemoryTier::new();
        remote.set_available(false);
        let sender = bus(&remote, "a");

        // Must not panic or error.
        sender.publish(&sender.key_message(vec!["ns:a".into()])).await;
    }
}
