//! Client connection handles and the registry that owns them.

pub mod handle;
pub mod registry;
