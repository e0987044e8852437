//! # ticker-api
//!
//! HTTP surface of the ticker relay: the WebSocket endpoint clients connect
//! to, and a health check.

pub mod error;
pub mod handlers;
pub mod router;
pub mod state;

pub use router::build_router;
pub use state::AppState;
