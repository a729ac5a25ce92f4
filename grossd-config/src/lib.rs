//! Configuration library for grossd.
//!
//! This crate centralizes the config model, the `name = value` file loader,
//! and validation rules. The `grossd` binary is the only consumer, but the
//! split keeps defaults and validation in one place and testable without
//! bringing up the engine.

pub mod error;
pub mod loader;
pub mod models;

pub use error::ConfigError;
pub use loader::{load_config, parse_config};
pub use models::{GrossConfig, SyncConfig, UpdatePolicy};
