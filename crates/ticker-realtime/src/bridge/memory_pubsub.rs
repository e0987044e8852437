//! In-memory pub/sub for single-node deployments and tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::RwLock;
use tokio::sync::broadcast;
use tracing::warn;

use ticker_core::error::AppError;
use ticker_core::result::AppResult;

use super::{ChannelMessage, MessageStream, PubSubBackend};

/// In-memory pub/sub implementation.
///
/// Like Redis, a message published while nobody is subscribed is discarded.
#[derive(Debug)]
pub struct MemoryPubSub {
    /// Channel name → broadcast sender
    channels: RwLock<HashMap<String, broadcast::Sender<ChannelMessage>>>,
    /// Buffer size for channels
    buffer_size: usize,
    /// When false, `subscribe` fails as if the server were unreachable
    available: AtomicBool,
}

impl MemoryPubSub {
    /// Create a new in-memory pub/sub
    pub fn new(buffer_size: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            buffer_size: buffer_size.max(1),
            available: AtomicBool::new(true),
        }
    }

    /// Publish a message to a channel, returning how many subscribers got it
    pub async fn publish(&self, channel: &str, payload: impl Into<Bytes>) -> usize {
        let channels = self.channels.read().await;
        match channels.get(channel) {
            Some(tx) => tx
                .send(ChannelMessage::new(channel, payload))
                .unwrap_or(0),
            None => 0,
        }
    }

    /// Ends every open subscription stream, as a dropped connection would.
    pub async fn disconnect_all(&self) {
        self.channels.write().await.clear();
    }

    /// Makes subsequent `subscribe` calls fail (false) or succeed (true).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of live subscribers on a channel.
    pub async fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .read()
            .await
            .get(channel)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl PubSubBackend for MemoryPubSub {
    async fn subscribe(&self, channel: &str) -> AppResult<MessageStream> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(AppError::pubsub(format!(
                "In-memory pub/sub unavailable, cannot subscribe to '{channel}'"
            )));
        }

        let rx = {
            let mut channels = self.channels.write().await;
            channels
                .entry(channel.to_string())
                .or_insert_with(|| broadcast::channel(self.buffer_size).0)
                .subscribe()
        };

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(msg) => return Some((msg, rx)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Subscriber lagged, messages were skipped");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });

        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_without_subscriber_is_discarded() {
        let pubsub = MemoryPubSub::new(8);
        assert_eq!(pubsub.publish("crypto-updates", "lost").await, 0);

        let mut stream = pubsub.subscribe("crypto-updates").await.expect("subscribe");
        assert_eq!(pubsub.publish("crypto-updates", "kept").await, 1);

        let msg = stream.next().await.expect("message");
        assert_eq!(msg.payload, Bytes::from_static(b"kept"));
    }

    #[tokio::test]
    async fn test_disconnect_ends_stream() {
        let pubsub = MemoryPubSub::new(8);
        let mut stream = pubsub.subscribe("crypto-updates").await.expect("subscribe");

        pubsub.disconnect_all().await;
        assert!(stream.next().await.is_none());
        assert_eq!(pubsub.subscriber_count("crypto-updates").await, 0);
    }

    #[tokio::test]
    async fn test_unavailable_backend_refuses_subscribe() {
        let pubsub = MemoryPubSub::new(8);
        pubsub.set_available(false);

        let err = pubsub.subscribe("crypto-updates").await.err().expect("error");
        assert_eq!(err.kind, ticker_core::error::ErrorKind::PubSub);
    }
}
