//! Sphaira client: joins a server, reports the local player's position and
//! keeps smoothed views of everyone else.

pub mod client;
pub mod error;
pub mod remote;

pub use client::{Client, ClientSettings, ClientState};
pub use error::{ClientError, JoinError};
pub use remote::RemotePlayers;
