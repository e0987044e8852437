//! Redis pub/sub backend.

#[cfg(feature = "redis-pubsub")]
pub mod implementation {
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::StreamExt;
    use tracing::info;

    use ticker_core::error::{AppError, ErrorKind};
    use ticker_core::result::AppResult;

    use crate::bridge::{ChannelMessage, MessageStream, PubSubBackend};

    /// Subscribes to a Redis channel over a dedicated pub/sub connection.
    #[derive(Debug, Clone)]
    pub struct RedisPubSub {
        /// Redis client (connections are opened per subscription).
        client: redis::Client,
        /// URL with the password masked, for logs and errors.
        display_url: String,
    }

    impl RedisPubSub {
        /// Creates a backend for `url`. Does not connect yet.
        pub fn new(url: &str) -> AppResult<Self> {
            let client = redis::Client::open(url).map_err(|e| {
                AppError::with_source(ErrorKind::Configuration, "Invalid Redis URL", e)
            })?;
            Ok(Self {
                client,
                display_url: mask_redis_url(url),
            })
        }
    }

    #[async_trait]
    impl PubSubBackend for RedisPubSub {
        async fn subscribe(&self, channel: &str) -> AppResult<MessageStream> {
            info!(url = %self.display_url, channel = %channel, "Connecting to Redis");

            let mut pubsub = self.client.get_async_pubsub().await.map_err(|e| {
                AppError::with_source(
                    ErrorKind::PubSub,
                    format!("Failed to connect to Redis at {}", self.display_url),
                    e,
                )
            })?;

            pubsub.subscribe(channel).await.map_err(|e| {
                AppError::with_source(
                    ErrorKind::PubSub,
                    format!("Redis SUBSCRIBE {channel} failed"),
                    e,
                )
            })?;

            let stream = pubsub.into_on_message().map(|msg| ChannelMessage {
                channel: msg.get_channel_name().to_string(),
                payload: Bytes::copy_from_slice(msg.get_payload_bytes()),
            });

            Ok(stream.boxed())
        }
    }

    /// Mask password in Redis URL for safe logging.
    pub(crate) fn mask_redis_url(url: &str) -> String {
        if let Some(at_pos) = url.find('@') {
            if let Some(colon_pos) = url[..at_pos].rfind(':') {
                let scheme_end = url.find("://").map(|p| p + 3).unwrap_or(0);
                if colon_pos > scheme_end {
                    return format!("{}:****@{}", &url[..colon_pos], &url[at_pos + 1..]);
                }
            }
        }
        url.to_string()
    }

}

#[cfg(not(feature = "redis-pubsub"))]
pub mod implementation {
    use async_trait::async_trait;

    use ticker_core::error::AppError;
    use ticker_core::result::AppResult;

    use crate::bridge::{MessageStream, PubSubBackend};

    /// Stub Redis backend when the redis feature is disabled.
    #[derive(Debug, Clone)]
    pub struct RedisPubSub;

    impl RedisPubSub {
        /// Creates a stub backend.
        pub fn new(_url: &str) -> AppResult<Self> {
            Ok(Self)
        }
    }

    #[async_trait]
    impl PubSubBackend for RedisPubSub {
        async fn subscribe(&self, _channel: &str) -> AppResult<MessageStream> {
            Err(AppError::configuration(
                "Redis support not compiled in (enable the redis-pubsub feature)",
            ))
        }
    }
}

pub use implementation::RedisPubSub;
