//! # ticker-realtime
//!
//! Real-time fan-out engine for the ticker relay. Provides:
//!
//! - A broadcast registry owning the set of live client connections
//! - A channel subscriber holding the single upstream subscription
//! - Pub/sub backends: Redis (multi-process) and in-memory (single node, tests)
//! - Relay metrics
//!
//! Data flows one way: channel → registry → clients.

pub mod bridge;
pub mod connection;
pub mod metrics;
pub mod server;
pub mod subscriber;

pub use bridge::{ChannelMessage, MemoryPubSub, PubSubBackend};
pub use connection::handle::{ClientConnection, ConnectionId, ConnectionState, SendOutcome};
pub use connection::registry::{BroadcastRegistry, FanoutReport};
pub use metrics::RelayMetrics;
pub use server::RelayEngine;
pub use subscriber::{ChannelSubscriber, SubscriptionState};
