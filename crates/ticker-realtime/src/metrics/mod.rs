//! Relay metrics.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Engine-level metrics counters.
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Messages received from the subscription
    pub messages_received: AtomicU64,
    /// Messages ignored because they were addressed to another channel
    pub messages_filtered: AtomicU64,
    /// Fan-out passes performed
    pub broadcasts: AtomicU64,
    /// Payloads queued to clients
    pub deliveries: AtomicU64,
    /// Clients dropped after a failed or stalled send
    pub delivery_failures: AtomicU64,
    /// Connections ever registered
    pub connections_total: AtomicU64,
    /// Connections currently registered
    pub connections_active: AtomicU64,
    /// Times the upstream subscription was lost
    pub subscription_drops: AtomicU64,
}

impl RelayMetrics {
    /// Create new zeroed metrics
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly registered connection
    pub fn record_connect(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a removed connection
    pub fn record_disconnect(&self) {
        // Saturate rather than wrap if a removal races a reset.
        let _ = self
            .connections_active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    /// Record one fan-out pass
    pub fn record_broadcast(&self, delivered: u64, failed: u64) {
        self.broadcasts.fetch_add(1, Ordering::Relaxed);
        self.deliveries.fetch_add(delivered, Ordering::Relaxed);
        self.delivery_failures.fetch_add(failed, Ordering::Relaxed);
    }

    /// Record a message read off the subscription
    pub fn record_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a message for a foreign channel
    pub fn record_filtered(&self) {
        self.messages_filtered.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a lost upstream subscription
    pub fn record_subscription_drop(&self) {
        self.subscription_drops.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_filtered: self.messages_filtered.load(Ordering::Relaxed),
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            subscription_drops: self.subscription_drops.load(Ordering::Relaxed),
        }
    }
}

/// Serializable metrics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub messages_received: u64,
    pub messages_filtered: u64,
    pub broadcasts: u64,
    pub deliveries: u64,
    pub delivery_failures: u64,
    pub connections_total: u64,
    pub connections_active: u64,
    pub subscription_drops: u64,
}
