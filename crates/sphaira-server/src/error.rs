//! Errors surfaced by server startup.

use sphaira_config::ConfigError;
use sphaira_net::{RegistryError, TransportError};

/// Errors that stop the server from starting.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Configuration could not be loaded or is invalid.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The bind address could not be resolved.
    #[error("cannot resolve bind address {0}")]
    Address(String),

    /// The transport failed to start.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Message kinds could not be registered.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
}
