//! Core data model and agent wire protocol for the dorsal backup coordinator.

pub mod config;
pub mod entity;
pub mod protocol;
pub mod trigger;

pub const VERSION: Option<&str> = option_env!("CARGO_PKG_VERSION");
