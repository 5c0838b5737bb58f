//! Outgoing message queue filled by handlers and flushed by the peer loop.

use crate::codec::WirePayload;
use crate::registry::MessageKind;
use crate::transport::{ConnectionId, TransportError};

/// Errors raised when a message cannot be sent.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The client has not learned the server's codes yet.
    #[error("message types have not been negotiated")]
    NotNegotiated,

    /// The kind is not in the table used for sending.
    #[error("message kind {0} is not known to the remote side")]
    UnknownKind(&'static str),

    /// A server-side message was queued without a connection target.
    #[error("message kind {0} has no connection target")]
    NoTarget(&'static str),

    /// The transport refused the message.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Where a queued message goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// The server (client side).
    Server,
    /// One connection (server side).
    Connection(ConnectionId),
    /// Several connections (server side).
    Connections(Vec<ConnectionId>),
}

/// One queued message.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    /// Kind the message is sent as.
    pub kind: MessageKind,
    /// Destination.
    pub target: Target,
    /// Encoded payload, without the code.
    pub payload: Vec<u8>,
}

/// Queue of messages produced during one loop tick.
#[derive(Debug, Default)]
pub struct Outbox {
    queue: Vec<OutgoingMessage>,
}

impl Outbox {
    /// Create an empty outbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a message for the server.
    pub fn send(&mut self, kind: MessageKind, payload: Vec<u8>) {
        self.push(kind, Target::Server, payload);
    }

    /// Queue a message for one connection.
    pub fn send_to(&mut self, connection: ConnectionId, kind: MessageKind, payload: Vec<u8>) {
        self.push(kind, Target::Connection(connection), payload);
    }

    /// Queue a message for several connections. Nothing is queued for an
    /// empty target list.
    pub fn send_to_many(
        &mut self,
        connections: Vec<ConnectionId>,
        kind: MessageKind,
        payload: Vec<u8>,
    ) {
        if connections.is_empty() {
            return;
        }
        self.push(kind, Target::Connections(connections), payload);
    }

    /// Queue a typed payload for the server.
    pub fn send_payload<P: WirePayload>(&mut self, kind: MessageKind, payload: &P) {
        self.send(kind, payload.to_bytes());
    }

    fn push(&mut self, kind: MessageKind, target: Target, payload: Vec<u8>) {
        self.queue.push(OutgoingMessage {
            kind,
            target,
            payload,
        });
    }

    /// Take every queued message in queue order.
    pub fn drain(&mut self) -> std::vec::Drain<'_, OutgoingMessage> {
        self.queue.drain(..)
    }

    /// Queued messages, oldest first.
    pub fn pending(&self) -> &[OutgoingMessage] {
        &self.queue
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
