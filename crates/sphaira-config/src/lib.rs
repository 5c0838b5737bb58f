//! Configuration system for Sphaira.
//!
//! Runtime settings for the server and client persist to disk as RON files.
//! Supports CLI overrides via clap, hot-reload detection, validation of the
//! world and synchronization parameters, and forward/backward compatible
//! serialization.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{
    Config, DebugConfig, JoinConfig, NetworkConfig, SyncConfig, WorldConfig, default_config_dir,
};
pub use error::ConfigError;
