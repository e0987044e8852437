//! Upstream pub/sub configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which pub/sub implementation feeds the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Redis `SUBSCRIBE`.
    Redis,
    /// In-process broadcast channels (single node, tests).
    Memory,
}

/// Upstream subscription settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PubSubConfig {
    /// Backend selection.
    #[serde(default = "default_backend")]
    pub backend: BackendKind,
    /// Redis connection URL.
    #[serde(default = "default_url")]
    pub url: String,
    /// The single channel the relay subscribes to.
    #[serde(default = "default_channel")]
    pub channel: String,
    /// Per-channel buffer for the in-memory backend.
    #[serde(default = "default_memory_buffer")]
    pub memory_buffer_size: usize,
    /// Resubscription policy after the upstream connection drops.
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            url: default_url(),
            channel: default_channel(),
            memory_buffer_size: default_memory_buffer(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Exponential backoff used when resubscribing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Whether to resubscribe automatically.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// First delay in milliseconds.
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    /// Delay ceiling in milliseconds.
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl ReconnectConfig {
    /// First delay as a [`Duration`].
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    /// Delay ceiling as a [`Duration`].
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms.max(self.initial_backoff_ms))
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_backend() -> BackendKind {
    BackendKind::Redis
}

fn default_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_channel() -> String {
    "crypto-updates".to_string()
}

fn default_memory_buffer() -> usize {
    1024
}

fn default_true() -> bool {
    true
}

fn default_initial_backoff() -> u64 {
    500
}

fn default_max_backoff() -> u64 {
    30_000
}
