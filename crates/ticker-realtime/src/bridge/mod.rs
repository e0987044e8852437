//! Pub/sub backends feeding the relay.
//!
//! The relay holds exactly one subscription; a backend turns that
//! subscription into an ordered stream of raw channel messages. The stream
//! ends when the underlying connection is lost.

pub mod memory_pubsub;
pub mod redis_pubsub;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use ticker_core::config::pubsub::{BackendKind, PubSubConfig};
use ticker_core::result::AppResult;

pub use memory_pubsub::MemoryPubSub;
pub use redis_pubsub::RedisPubSub;

/// One message as received from the channel. The payload is never decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMessage {
    /// Channel the message was published on.
    pub channel: String,
    /// Raw serialized payload.
    pub payload: Bytes,
}

impl ChannelMessage {
    /// Create a message.
    pub fn new(channel: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }
}

/// Ordered stream of messages for one subscription.
pub type MessageStream = BoxStream<'static, ChannelMessage>;

/// A publish/subscribe transport.
#[async_trait]
pub trait PubSubBackend: Send + Sync + std::fmt::Debug {
    /// Subscribes to `channel`.
    ///
    /// Errors mean the backend could not be reached; the caller decides
    /// whether that is fatal.
    async fn subscribe(&self, channel: &str) -> AppResult<MessageStream>;
}

/// Builds the backend selected in configuration.
pub fn backend_from_config(config: &PubSubConfig) -> AppResult<Arc<dyn PubSubBackend>> {
    match config.backend {
        BackendKind::Redis => Ok(Arc::new(RedisPubSub::new(&config.url)?)),
        BackendKind::Memory => Ok(Arc::new(MemoryPubSub::new(config.memory_buffer_size))),
    }
}
