//! Game-level protocol for Sphaira: message kinds and payloads, world
//! parameters, the position send policy, and remote-player smoothing.
//!
//! Everything here is transport-agnostic and free of peer state; the server
//! and client crates wire these pieces into their handlers and loops.

pub mod messages;
pub mod send_policy;
pub mod smoothing;
pub mod world;

pub use messages::{
    PLAYER_INFO, PLAYER_POS, PositionRelay, PositionUpdate, Roster, WORLD_INFO, WorldInfo,
};
pub use send_policy::{PositionSendPolicy, SendPolicyConfig};
pub use smoothing::{DEFAULT_SMOOTHING, RemotePlayerView};
pub use world::{WorldClock, WorldParameters};
