//! Configuration model for jobguard.
//!
//! This module defines the Config struct that represents `jobguard.yaml`.
//! It supports forward-compatible YAML parsing (unknown fields are ignored),
//! defaults for every field, and validation of config values.

mod model;
mod operations;


// Re-export public API
pub use model::{CONFIG_FILE, Config};
