//! Configuration Module
//!
//! Configuration loading for the sync daemon.

mod settings;

pub use settings::{ConfigError, ConnectionSettings, ServerSettings, SyncConfig};
