//! Client error types.

use sphaira_config::ConfigError;
use sphaira_net::{RegistryError, SetupError, TransportError};

/// The client could not enter the world.
#[derive(Debug, thiserror::Error)]
pub enum JoinError {
    /// Negotiation or bootstrap did not complete.
    #[error("could not join server: {0}")]
    Setup(#[from] SetupError),
}

/// Errors that stop the client binary.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Configuration could not be loaded or is invalid.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The server address could not be resolved.
    #[error("cannot resolve server address {0}")]
    Address(String),

    /// Connecting failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Message kinds could not be registered.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Joining failed.
    #[error(transparent)]
    Join(#[from] JoinError),
}
