//! Server side of the message protocol.
//!
//! A [`ServerPeer`] owns the authoritative registry and a transport. Its
//! registration order defines the wire codes; clients learn them through the
//! sentinel request, which the peer answers itself without involving any
//! application handler.

use crate::delivery::CONTROL_DELIVERY;
use crate::dispatch::{DispatchOutcome, encode_message, invoke, split_code};
use crate::outbox::{Outbox, SendError, Target};
use crate::registry::{MessageHandler, MessageKind, MessageRegistry, RegistryError, SENTINEL_CODE};
use crate::transport::{ConnectionId, Transport, TransportEvent};

/// Server peer: registry, dispatcher and transport for one listening side.
pub struct ServerPeer<C, T> {
    registry: MessageRegistry<C>,
    transport: T,
}

impl<C, T: Transport> ServerPeer<C, T> {
    /// Wrap a listening transport.
    pub fn new(transport: T) -> Self {
        Self {
            registry: MessageRegistry::new(),
            transport,
        }
    }

    /// Register a handler for `kind`. See [`MessageRegistry::register`].
    pub fn register<H>(&mut self, kind: MessageKind, handler: H) -> Result<u16, RegistryError>
    where
        H: MessageHandler<C> + 'static,
    {
        self.registry.register(kind, handler)
    }

    /// Advertise a kind this side only sends.
    pub fn declare(&mut self, kind: MessageKind) -> Result<u16, RegistryError> {
        self.registry.declare(kind)
    }

    /// The registry.
    pub fn registry(&self) -> &MessageRegistry<C> {
        &self.registry
    }

    /// The transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The transport, mutably.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Live connections as reported by the transport.
    pub fn connections(&self) -> Vec<ConnectionId> {
        self.transport.connections()
    }

    /// Drain every pending transport event, dispatching messages into `ctx`.
    ///
    /// Returns whether anything arrived.
    pub fn poll(&mut self, ctx: &mut C) -> bool {
        let mut received = false;
        while let Some(event) = self.transport.poll() {
            received = true;
            match event {
                TransportEvent::Connected(connection) => {
                    tracing::info!("Client connected: {connection:?}");
                }
                TransportEvent::Message { from, payload } => {
                    self.dispatch(ctx, from, &payload);
                }
                TransportEvent::Disconnected { connection, reason } => {
                    tracing::info!("Client disconnected: {connection:?} ({reason})");
                }
            }
        }
        received
    }

    /// Dispatch one application message from `sender`.
    pub fn dispatch(&mut self, ctx: &mut C, sender: ConnectionId, bytes: &[u8]) -> DispatchOutcome {
        let Some((code, payload)) = split_code(bytes) else {
            tracing::warn!("Dropping {}-byte message from {sender:?}: no code", bytes.len());
            return DispatchOutcome::Malformed;
        };

        if code == SENTINEL_CODE {
            self.answer_negotiation(sender);
            return DispatchOutcome::Control;
        }

        let Some(kind) = self.registry.kind_at(code) else {
            tracing::warn!("No handler registered for code {code} from {sender:?}, dropping message");
            return DispatchOutcome::Unhandled { code };
        };
        match self.registry.handler_mut(code) {
            Some(handler) => invoke(handler, ctx, sender, code, kind.ident, payload),
            None => {
                tracing::warn!("No handler registered for {} from {sender:?}, dropping message", kind.ident);
                DispatchOutcome::Unhandled { code }
            }
        }
    }

    fn answer_negotiation(&mut self, sender: ConnectionId) {
        let table = match self.registry.encode_table() {
            Ok(table) => table,
            Err(e) => {
                tracing::warn!("Cannot encode message table for {sender:?}: {e}");
                return;
            }
        };
        let bytes = encode_message(SENTINEL_CODE, &table);
        match self.transport.send(sender, CONTROL_DELIVERY, bytes) {
            Ok(()) => tracing::debug!(
                "Sent {} message types to {sender:?}",
                self.registry.len()
            ),
            Err(e) => tracing::warn!("Failed to answer negotiation from {sender:?}: {e}"),
        }
    }

    /// Send `payload` as `kind` to one connection.
    pub fn send(
        &mut self,
        to: ConnectionId,
        kind: MessageKind,
        payload: &[u8],
    ) -> Result<(), SendError> {
        let code = self
            .registry
            .index_of(kind.ident)
            .ok_or(SendError::UnknownKind(kind.ident))?;
        let delivery = self
            .registry
            .kind_at(code)
            .map_or(kind.delivery, |registered| registered.delivery);
        self.transport
            .send(to, delivery, encode_message(code, payload))?;
        Ok(())
    }

    /// Send every queued message. Returns the number of transport sends
    /// that succeeded; failures are logged.
    pub fn flush(&mut self, outbox: &mut Outbox) -> usize {
        let mut sent = 0;
        for message in outbox.drain() {
            let targets = match message.target {
                Target::Connection(connection) => vec![connection],
                Target::Connections(connections) => connections,
                Target::Server => {
                    tracing::warn!("{}", SendError::NoTarget(message.kind.ident));
                    continue;
                }
            };
            for to in targets {
                match self.send(to, message.kind, &message.payload) {
                    Ok(()) => sent += 1,
                    Err(e) => tracing::debug!("Send of {} to {to:?} failed: {e}", message.kind.ident),
                }
            }
        }
        sent
    }
}
