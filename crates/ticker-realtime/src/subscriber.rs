//! Channel subscriber: holds the one upstream subscription and hands every
//! message, in receipt order, to the broadcast registry.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use ticker_core::config::pubsub::ReconnectConfig;
use ticker_core::result::AppResult;

use crate::bridge::{ChannelMessage, MessageStream, PubSubBackend};
use crate::connection::registry::{BroadcastRegistry, FanoutReport};
use crate::metrics::RelayMetrics;

/// Health of the upstream subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionState {
    /// Not yet subscribed, or resubscribing.
    Connecting,
    /// Receiving messages.
    Live,
    /// Connection lost; no messages are flowing.
    Down,
}

/// Owns the single subscription to the update channel.
pub struct ChannelSubscriber {
    backend: Arc<dyn PubSubBackend>,
    channel: String,
    registry: Arc<BroadcastRegistry>,
    reconnect: ReconnectConfig,
    metrics: Arc<RelayMetrics>,
    stream: Option<MessageStream>,
    state_tx: watch::Sender<SubscriptionState>,
}

impl std::fmt::Debug for ChannelSubscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelSubscriber")
            .field("channel", &self.channel)
            .field("subscribed", &self.stream.is_some())
            .finish()
    }
}

impl ChannelSubscriber {
    /// Creates an unsubscribed subscriber for `channel`.
    pub fn new(
        backend: Arc<dyn PubSubBackend>,
        channel: impl Into<String>,
        registry: Arc<BroadcastRegistry>,
        reconnect: ReconnectConfig,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        let (state_tx, _) = watch::channel(SubscriptionState::Connecting);
        Self {
            backend,
            channel: channel.into(),
            registry,
            reconnect,
            metrics,
            stream: None,
            state_tx,
        }
    }

    /// The channel this subscriber listens on.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Watch the subscription state.
    pub fn state(&self) -> watch::Receiver<SubscriptionState> {
        self.state_tx.subscribe()
    }

    /// Establishes the subscription.
    ///
    /// Calling it again once subscribed does nothing. A failure here is the
    /// fatal startup error: it is returned, not retried.
    pub async fn subscribe(&mut self) -> AppResult<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let stream = self.backend.subscribe(&self.channel).await?;
        self.stream = Some(stream);
        self.state_tx.send_replace(SubscriptionState::Live);
        info!(channel = %self.channel, "Subscribed, listening for updates");
        Ok(())
    }

    /// Handles one received message.
    ///
    /// Messages for any other channel are ignored. Matching payloads go to
    /// the registry unmodified; per-client outcomes stay in the report.
    pub fn on_message(&self, msg: ChannelMessage) -> Option<FanoutReport> {
        self.metrics.record_received();

        if msg.channel != self.channel {
            self.metrics.record_filtered();
            warn!(
                expected = %self.channel,
                received = %msg.channel,
                "Ignoring message for unsubscribed channel"
            );
            return None;
        }

        let report = self.registry.fanout(&msg.payload);
        debug!(
            channel = %self.channel,
            clients = report.attempted,
            "Relayed update"
        );
        Some(report)
    }

    /// Receives and relays messages until `shutdown` flips to true.
    ///
    /// Subscribes first if [`Self::subscribe`] has not been called. After a
    /// lost connection the registry keeps its members; the subscriber either
    /// resubscribes with backoff or, with reconnect disabled, stays `Down`.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> AppResult<()> {
        self.subscribe().await?;

        loop {
            let Some(mut stream) = self.stream.take() else {
                break;
            };

            let ended = loop {
                tokio::select! {
                    biased;
                    _ = shutdown_requested(&mut shutdown) => break false,
                    next = stream.next() => match next {
                        Some(msg) => {
                            self.on_message(msg);
                        }
                        None => break true,
                    },
                }
            };
            drop(stream);

            if !ended {
                break;
            }

            self.metrics.record_subscription_drop();
            self.state_tx.send_replace(SubscriptionState::Down);
            warn!(
                channel = %self.channel,
                clients = self.registry.len(),
                "Upstream subscription lost, updates paused"
            );

            if !self.reconnect.enabled {
                error!(
                    channel = %self.channel,
                    "Reconnect disabled, no further updates will be relayed"
                );
                shutdown_requested(&mut shutdown).await;
                break;
            }

            if !self.resubscribe(&mut shutdown).await {
                break;
            }
        }

        self.stream = None;
        self.state_tx.send_replace(SubscriptionState::Down);
        info!(channel = %self.channel, "Subscriber stopped");
        Ok(())
    }

    /// Retries the subscription with exponential backoff.
    ///
    /// Returns false if shutdown was requested first.
    async fn resubscribe(&mut self, shutdown: &mut watch::Receiver<bool>) -> bool {
        let mut delay = self.reconnect.initial_backoff();
        let mut attempt: u32 = 0;

        loop {
            tokio::select! {
                biased;
                _ = shutdown_requested(shutdown) => return false,
                _ = tokio::time::sleep(delay) => {}
            }

            attempt += 1;
            self.state_tx.send_replace(SubscriptionState::Connecting);

            match self.backend.subscribe(&self.channel).await {
                Ok(stream) => {
                    self.stream = Some(stream);
                    self.state_tx.send_replace(SubscriptionState::Live);
                    info!(channel = %self.channel, attempt, "Resubscribed, updates resumed");
                    return true;
                }
                Err(e) => {
                    self.state_tx.send_replace(SubscriptionState::Down);
                    warn!(
                        channel = %self.channel,
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "Resubscribe failed"
                    );
                    delay = next_backoff(delay, self.reconnect.max_backoff());
                }
            }
        }
    }
}

fn next_backoff(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}

/// Resolves once the shutdown flag is true or its sender is gone.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
