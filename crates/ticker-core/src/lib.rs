//! # ticker-core
//!
//! Core crate for the ticker relay. Contains configuration schemas,
//! the market-data update model, and the unified error system.
//!
//! This crate has **no** internal dependencies on other relay crates.

pub mod config;
pub mod error;
pub mod result;
pub mod types;

pub use error::AppError;
pub use result::AppResult;
