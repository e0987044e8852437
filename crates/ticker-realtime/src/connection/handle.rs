//! Individual client connection handle.

use std::sync::atomic::{AtomicU8, Ordering};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Unique connection identifier
pub type ConnectionId = Uuid;

/// Lifecycle of a connection: `Pending → Open → Closed`.
///
/// `Closed` is terminal. A reconnecting client gets a new handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted, not yet registered.
    Pending,
    /// Registered and writable.
    Open,
    /// Closed by the client, by shutdown, or after a failed send.
    Closed,
}

impl ConnectionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Pending,
            1 => Self::Open,
            _ => Self::Closed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Open => 1,
            Self::Closed => 2,
        }
    }
}

/// Why a send to one client did not go through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendFailure {
    /// The outbound queue is full; the client is not keeping up.
    QueueFull,
    /// The receiving side of the queue is gone.
    Disconnected,
}

impl std::fmt::Display for SendFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::QueueFull => write!(f, "outbound queue full"),
            Self::Disconnected => write!(f, "client disconnected"),
        }
    }
}

/// Result of one delivery attempt, consumed by the fan-out loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Payload queued for the client's socket writer.
    Delivered,
    /// Connection was not open; nothing attempted.
    Skipped,
    /// Delivery failed; the connection must be dropped.
    Failed(SendFailure),
}

/// A handle to a single downstream connection.
///
/// Holds the sender half of the client's outbound queue. The socket writer
/// owns the receiver and drains it in order.
#[derive(Debug)]
pub struct ClientConnection {
    /// Unique connection ID
    pub id: ConnectionId,
    /// When the connection was accepted
    pub connected_at: DateTime<Utc>,
    /// Sender for outbound payloads
    sender: mpsc::Sender<Bytes>,
    /// Encoded [`ConnectionState`]
    state: AtomicU8,
    /// Cancelled on the transition to `Closed`
    closed: CancellationToken,
}

impl ClientConnection {
    /// Create a pending connection and the receiver its writer drains.
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        let conn = Self {
            id: Uuid::new_v4(),
            connected_at: Utc::now(),
            sender,
            state: AtomicU8::new(ConnectionState::Pending.as_u8()),
            closed: CancellationToken::new(),
        };
        (conn, receiver)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether the connection is open and writable.
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open && !self.sender.is_closed()
    }

    /// Transition `Pending → Open`. Returns false for any other state.
    pub fn open(&self) -> bool {
        self.transition(ConnectionState::Pending, ConnectionState::Open)
    }

    /// Transition to `Closed`. Returns true only for the call that closed it.
    pub fn close(&self) -> bool {
        let previous = self
            .state
            .swap(ConnectionState::Closed.as_u8(), Ordering::AcqRel);
        self.closed.cancel();
        previous != ConnectionState::Closed.as_u8()
    }

    /// Resolves once the connection has been closed.
    ///
    /// The socket writer selects on this so a registry-side close (failed
    /// send, shutdown) tears down the socket even while the handle is shared.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Queue a payload without waiting.
    ///
    /// A full queue counts as a failure: waiting on one slow client would
    /// stall every other client in the same fan-out.
    pub fn try_send(&self, payload: &Bytes) -> SendOutcome {
        if self.state() != ConnectionState::Open {
            return SendOutcome::Skipped;
        }
        match self.sender.try_send(payload.clone()) {
            Ok(()) => SendOutcome::Delivered,
            Err(mpsc::error::TrySendError::Full(_)) => SendOutcome::Failed(SendFailure::QueueFull),
            Err(mpsc::error::TrySendError::Closed(_)) => {
                SendOutcome::Failed(SendFailure::Disconnected)
            }
        }
    }
}
