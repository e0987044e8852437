//! Top-level relay engine that ties the subscriber and registry together.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use ticker_core::config::AppConfig;
use ticker_core::result::AppResult;

use crate::bridge::PubSubBackend;
use crate::connection::registry::BroadcastRegistry;
use crate::metrics::RelayMetrics;
use crate::subscriber::{ChannelSubscriber, SubscriptionState};

/// Central relay engine: one subscription in, every client out.
///
/// The registry is constructed here and handed to both the subscriber task
/// and (through [`RelayEngine::registry`]) the connection accept path.
pub struct RelayEngine {
    /// Connected clients.
    pub registry: Arc<BroadcastRegistry>,
    /// Metrics collector.
    pub metrics: Arc<RelayMetrics>,
    channel: String,
    subscription: watch::Receiver<SubscriptionState>,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<AppResult<()>>>>,
}

impl std::fmt::Debug for RelayEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayEngine")
            .field("channel", &self.channel)
            .finish()
    }
}

impl RelayEngine {
    /// Subscribes to the configured channel and starts relaying.
    ///
    /// Fails if the initial subscription cannot be established.
    pub async fn start(config: &AppConfig, backend: Arc<dyn PubSubBackend>) -> AppResult<Self> {
        let metrics = Arc::new(RelayMetrics::new());
        let registry = Arc::new(BroadcastRegistry::new(
            config.realtime.channel_buffer_size,
            metrics.clone(),
        ));

        let mut subscriber = ChannelSubscriber::new(
            backend,
            config.pubsub.channel.clone(),
            registry.clone(),
            config.pubsub.reconnect.clone(),
            metrics.clone(),
        );
        subscriber.subscribe().await?;
        let subscription = subscriber.state();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let result = subscriber.run(shutdown_rx).await;
            if let Err(e) = &result {
                error!(error = %e, "Subscriber task failed");
            }
            result
        });

        info!(channel = %config.pubsub.channel, "Relay engine started");

        Ok(Self {
            registry,
            metrics,
            channel: config.pubsub.channel.clone(),
            subscription,
            shutdown_tx,
            task: Mutex::new(Some(task)),
        })
    }

    /// The channel being relayed.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Current upstream subscription state.
    pub fn subscription_state(&self) -> SubscriptionState {
        *self.subscription.borrow()
    }

    /// Watch the upstream subscription state.
    pub fn subscription_watch(&self) -> watch::Receiver<SubscriptionState> {
        self.subscription.clone()
    }

    /// Stops the subscriber, waits up to `grace` for it, and closes every
    /// client connection. Safe to call more than once.
    pub async fn shutdown(&self, grace: Duration) {
        info!("Shutting down relay engine");
        self.shutdown_tx.send_replace(true);

        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            stop_task(task, grace).await;
        }

        let closed = self.registry.close_all();
        info!(closed, "Relay engine shut down");
    }
}

/// Waits up to `grace` for the subscriber task, then aborts it so the
/// upstream subscription is released either way.
async fn stop_task<T>(mut task: JoinHandle<T>, grace: Duration) {
    match tokio::time::timeout(grace, &mut task).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => error!(error = %e, "Subscriber task aborted"),
        Err(_) => {
            warn!(grace_ms = grace.as_millis() as u64, "Subscriber did not stop in time, aborting");
            task.abort();
            let _ = task.await;
        }
    }
}
