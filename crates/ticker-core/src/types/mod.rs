//! Shared data types.

pub mod update;

pub use update::UpdateEvent;
