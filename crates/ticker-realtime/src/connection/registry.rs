//! Broadcast registry: owns the set of live client connections.
//!
//! Membership is a `HashMap` behind a single `RwLock`. Fan-out clones the
//! member list under the read lock and then delivers without holding it, so
//! a connection registered or removed mid-fan-out is either fully in the
//! snapshot or fully out of it, and removals never wait on delivery.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::metrics::RelayMetrics;

use super::handle::{ClientConnection, ConnectionId, ConnectionState, SendOutcome};

/// Outcome of one fan-out pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanoutReport {
    /// Members present when the pass started.
    pub attempted: usize,
    /// Members the payload was queued for.
    pub delivered: usize,
    /// Members found not open and removed by this pass.
    pub skipped: usize,
    /// Members whose send failed and were removed by this pass.
    pub dropped: usize,
}

#[derive(Debug, Default)]
struct Members {
    clients: HashMap<ConnectionId, Arc<ClientConnection>>,
    /// Set by [`BroadcastRegistry::close_all`]; later registrations are refused.
    shut_down: bool,
}

/// Thread-safe registry of every connected client.
#[derive(Debug)]
pub struct BroadcastRegistry {
    members: RwLock<Members>,
    /// Outbound queue depth for connections created through [`Self::connect`].
    buffer_size: usize,
    metrics: Arc<RelayMetrics>,
}

impl BroadcastRegistry {
    /// Creates an empty registry.
    pub fn new(buffer_size: usize, metrics: Arc<RelayMetrics>) -> Self {
        Self {
            members: RwLock::new(Members::default()),
            buffer_size,
            metrics,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Members> {
        self.members.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Members> {
        self.members.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates a connection, registers it, and returns the receiver its
    /// socket writer must drain.
    pub fn connect(&self) -> (Arc<ClientConnection>, mpsc::Receiver<Bytes>) {
        let (conn, rx) = ClientConnection::new(self.buffer_size);
        let conn = Arc::new(conn);
        self.register(conn.clone());
        (conn, rx)
    }

    /// Adds a connection to the set and marks it open.
    ///
    /// Closed handles are never re-admitted; after [`Self::close_all`] every
    /// new handle is closed on arrival.
    pub fn register(&self, conn: Arc<ClientConnection>) {
        let mut members = self.write();

        if members.shut_down {
            conn.close();
            debug!(conn_id = %conn.id, "Registry shut down, refusing connection");
            return;
        }
        if !conn.open() && conn.state() != ConnectionState::Open {
            warn!(conn_id = %conn.id, state = ?conn.state(), "Refusing to register closed connection");
            return;
        }
        if members.clients.insert(conn.id, conn.clone()).is_some() {
            return;
        }
        let total = members.clients.len();
        drop(members);

        self.metrics.record_connect();
        info!(conn_id = %conn.id, clients = total, "Client connected");
    }

    /// Removes a connection if present and marks it closed.
    ///
    /// Idempotent: returns false when the connection was already gone.
    pub fn deregister(&self, conn_id: &ConnectionId) -> bool {
        let mut members = self.write();
        let Some(conn) = members.clients.remove(conn_id) else {
            return false;
        };
        let total = members.clients.len();
        drop(members);

        conn.close();
        self.metrics.record_disconnect();
        let connected_secs = (Utc::now() - conn.connected_at).num_seconds();
        info!(conn_id = %conn_id, clients = total, connected_secs, "Client disconnected");
        true
    }

    /// Delivers `payload` to every member present when the call starts.
    ///
    /// Each member is attempted exactly once. Members that are not open or
    /// whose send fails are removed; the rest of the pass continues.
    pub fn fanout(&self, payload: &Bytes) -> FanoutReport {
        let snapshot: Vec<Arc<ClientConnection>> = self.read().clients.values().cloned().collect();
        self.deliver(&snapshot, payload)
    }

    fn deliver(&self, snapshot: &[Arc<ClientConnection>], payload: &Bytes) -> FanoutReport {
        let mut report = FanoutReport {
            attempted: snapshot.len(),
            ..FanoutReport::default()
        };

        for conn in snapshot {
            match conn.try_send(payload) {
                SendOutcome::Delivered => report.delivered += 1,
                SendOutcome::Skipped => {
                    // A concurrent close may have removed it already.
                    if self.deregister(&conn.id) {
                        report.skipped += 1;
                    }
                }
                SendOutcome::Failed(reason) => {
                    if self.deregister(&conn.id) {
                        report.dropped += 1;
                        warn!(conn_id = %conn.id, reason = %reason, "Dropping client after failed send");
                    }
                }
            }
        }

        self.metrics
            .record_broadcast(report.delivered as u64, report.dropped as u64);
        debug!(
            clients = report.attempted,
            delivered = report.delivered,
            dropped = report.dropped,
            "Broadcast update"
        );
        report
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.read().clients.len()
    }

    /// Whether no connections are registered.
    pub fn is_empty(&self) -> bool {
        self.read().clients.is_empty()
    }

    /// Whether a connection is currently registered.
    pub fn contains(&self, conn_id: &ConnectionId) -> bool {
        self.read().clients.contains_key(conn_id)
    }

    /// Whether [`Self::close_all`] has run.
    pub fn is_shut_down(&self) -> bool {
        self.read().shut_down
    }

    /// Closes and removes every connection, and refuses new ones.
    ///
    /// Each socket writer observes the close and shuts its socket.
    pub fn close_all(&self) -> usize {
        let drained: Vec<Arc<ClientConnection>> = {
            let mut members = self.write();
            members.shut_down = true;
            members.clients.drain().map(|(_, conn)| conn).collect()
        };

        for conn in &drained {
            conn.close();
            self.metrics.record_disconnect();
        }
        info!(count = drained.len(), "All connections closed");
        drained.len()
    }
}
