//! Networking layer for Sphaira.
//!
//! Provides message-type negotiation, code-based dispatch to handlers,
//! per-channel delivery sequencing, a little-endian payload codec, and two
//! transports (in-process and TCP) behind one [`transport::Transport`] trait.
//!
//! Both peer roles own their state explicitly: a [`ServerPeer`] or
//! [`ClientPeer`] holds its registry and transport, and handlers receive a
//! caller-owned context, so any number of peers can share a process.

pub mod client_peer;
pub mod codec;
pub mod delivery;
pub mod dispatch;
pub mod framing;
pub mod outbox;
pub mod registry;
pub mod server_peer;
pub mod signal;
pub mod transport;

pub use client_peer::{ClientPeer, RetryPolicy, SetupError};
pub use codec::{PayloadError, PayloadReader, PayloadWriter, WirePayload};
pub use delivery::{CONTROL_DELIVERY, Delivery, DeliveryMethod, SequencedLink};
pub use dispatch::DispatchOutcome;
pub use framing::{FrameConfig, FrameError, Packet};
pub use outbox::{Outbox, OutgoingMessage, SendError, Target};
pub use registry::{
    HandlerError, IncomingMessage, MessageHandler, MessageKind, MessageRegistry, NegotiatedTable,
    RegistryError, SENTINEL_CODE,
};
pub use server_peer::ServerPeer;
pub use signal::watch_ctrl_c;
pub use transport::memory::{MemoryClientTransport, MemoryConnector, MemoryServerTransport, memory_network};
pub use transport::tcp::{ConnectionState, TcpClientTransport, TcpConfig, TcpServerTransport};
pub use transport::{ConnectionId, Transport, TransportError, TransportEvent};
