//! Transport abstraction used by the peers.
//!
//! A transport establishes connections, moves application messages with a
//! [`Delivery`] and reports connection changes as [`TransportEvent`]s. It is
//! polled from the peer loop and never calls back into protocol code.

pub mod memory;
pub mod tcp;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::delivery::Delivery;

/// Identifier of one connection as seen by the local side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    /// The single connection a client transport has: the server.
    pub const SERVER: ConnectionId = ConnectionId(0);
}

/// Atomic generator for monotonically increasing [`ConnectionId`]s.
#[derive(Debug)]
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    /// Create a new generator starting at 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Return the next unique [`ConnectionId`].
    pub fn next_id(&self) -> ConnectionId {
        ConnectionId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Something that happened on a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A connection was established.
    Connected(ConnectionId),
    /// An application message arrived.
    Message {
        /// Connection it arrived on.
        from: ConnectionId,
        /// `[u16 code][payload]`.
        payload: Vec<u8>,
    },
    /// A connection is gone.
    Disconnected {
        /// The lost connection.
        connection: ConnectionId,
        /// Human-readable cause.
        reason: String,
    },
}

/// Transport-level failures.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection is not (or no longer) live.
    #[error("unknown connection {0:?}")]
    UnknownConnection(ConnectionId),

    /// The connection was closed.
    #[error("connection closed")]
    Closed,

    /// Nobody is accepting connections.
    #[error("no listener accepting connections")]
    NoListener,

    /// Connecting failed.
    #[error("could not connect to {addr}: {source}")]
    ConnectFailed {
        /// Target address.
        addr: SocketAddr,
        /// Underlying error.
        source: std::io::Error,
    },

    /// Connecting took longer than allowed.
    #[error("connecting to {addr} timed out after {timeout:?}")]
    ConnectTimedOut {
        /// Target address.
        addr: SocketAddr,
        /// The configured limit.
        timeout: Duration,
    },

    /// Binding the listener failed.
    #[error("could not bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: SocketAddr,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The background I/O runtime could not be started.
    #[error("failed to start network runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

/// A message transport polled from a peer loop.
pub trait Transport {
    /// Next pending event, without blocking.
    fn poll(&mut self) -> Option<TransportEvent>;

    /// Send an application message to `to` with `delivery`.
    fn send(
        &mut self,
        to: ConnectionId,
        delivery: Delivery,
        payload: Vec<u8>,
    ) -> Result<(), TransportError>;

    /// Live connections, in a stable order.
    fn connections(&self) -> Vec<ConnectionId>;
}
