//! Client side of the message protocol.
//!
//! A [`ClientPeer`] keeps its own registry of handlers but dispatches and
//! sends with the codes the server advertised. Until negotiation completes
//! every incoming application message is dropped and every send fails with
//! [`SendError::NotNegotiated`].

use std::time::{Duration, Instant};

use crate::codec::PayloadReader;
use crate::delivery::CONTROL_DELIVERY;
use crate::dispatch::{DispatchOutcome, encode_message, invoke, split_code};
use crate::outbox::{Outbox, SendError, Target};
use crate::registry::{
    MessageHandler, MessageKind, MessageRegistry, NegotiatedTable, RegistryError, SENTINEL_CODE,
};
use crate::transport::{ConnectionId, Transport, TransportEvent};

/// Bounds on a blocking setup exchange.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// How long one attempt waits for its reply.
    pub attempt_timeout: Duration,
    /// Attempts before giving up.
    pub max_attempts: u32,
    /// Sleep between polls that returned nothing.
    pub poll_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(2),
            max_attempts: 5,
            poll_interval: Duration::from_millis(16),
        }
    }
}

/// A setup exchange that did not complete.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    /// No reply within the retry budget.
    #[error("{stage} got no reply after {attempts} attempts")]
    TimedOut {
        /// Exchange that failed.
        stage: &'static str,
        /// Attempts made.
        attempts: u32,
    },

    /// The connection dropped while waiting.
    #[error("connection lost during {stage}")]
    Disconnected {
        /// Exchange that failed.
        stage: &'static str,
    },

    /// The request could not be sent.
    #[error(transparent)]
    Send(#[from] SendError),
}

/// Client peer: local handlers, negotiated codes and a transport.
pub struct ClientPeer<C, T> {
    registry: MessageRegistry<C>,
    table: Option<NegotiatedTable>,
    transport: T,
    connected: bool,
}

impl<C, T: Transport> ClientPeer<C, T> {
    /// Wrap a connected transport.
    pub fn new(transport: T) -> Self {
        Self {
            registry: MessageRegistry::new(),
            table: None,
            transport,
            connected: true,
        }
    }

    /// Register a handler for `kind`. Takes effect immediately, also after
    /// negotiation.
    pub fn register<H>(&mut self, kind: MessageKind, handler: H) -> Result<(), RegistryError>
    where
        H: MessageHandler<C> + 'static,
    {
        self.registry.register(kind, handler)?;
        if let Some(table) = &mut self.table {
            table.bind(&self.registry);
        }
        Ok(())
    }

    /// The local registry.
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

    /// Ask the server for its message table. Forgets any earlier table.
    pub fn request_message_types(&mut self) -> Result<(), SendError> {
        self.table = None;
        self.transport.send(
            ConnectionId::SERVER,
            CONTROL_DELIVERY,
            encode_message(SENTINEL_CODE, &[]),
        )?;
        tracing::debug!("Requested message types");
        Ok(())
    }

    /// Whether the server's table has been received.
    pub fn is_negotiated(&self) -> bool {
        self.table.is_some()
    }

    /// The server's table, once received.
    pub fn table(&self) -> Option<&NegotiatedTable> {
        self.table.as_ref()
    }

    /// Server code for `ident`.
    pub fn server_code(&self, ident: &str) -> Option<u16> {
        self.table.as_ref()?.code_of(ident)
    }

    /// Whether the transport still reports the server connection.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Drain every pending transport event, dispatching messages into `ctx`.
    ///
    /// Returns whether anything arrived.
    pub fn poll(&mut self, ctx: &mut C) -> bool {
        let mut received = false;
        while let Some(event) = self.transport.poll() {
            received = true;
            match event {
                TransportEvent::Connected(_) => {
                    self.connected = true;
                    tracing::debug!("Transport connected");
                }
                TransportEvent::Message { payload, .. } => {
                    self.dispatch(ctx, &payload);
                }
                TransportEvent::Disconnected { reason, .. } => {
                    self.connected = false;
                    tracing::warn!("Disconnected from server: {reason}");
                }
            }
        }
        received
    }

    /// Dispatch one application message from the server.
    pub fn dispatch(&mut self, ctx: &mut C, bytes: &[u8]) -> DispatchOutcome {
        let Some((code, payload)) = split_code(bytes) else {
            tracing::warn!("Dropping {}-byte message from server: no code", bytes.len());
            return DispatchOutcome::Malformed;
        };

        if code == SENTINEL_CODE {
            return self.accept_table(payload);
        }

        let Some(table) = &self.table else {
            tracing::warn!("Dropping message with code {code} received before negotiation");
            return DispatchOutcome::Unhandled { code };
        };
        let ident = table.ident_at(code).unwrap_or("?");
        let handler = table
            .binding(code)
            .and_then(|local| self.registry.handler_mut(local));
        match handler {
            Some(handler) => invoke(handler, ctx, ConnectionId::SERVER, code, ident, payload),
            None => {
                tracing::warn!("No handler registered for code {code} ({ident}), dropping message");
                DispatchOutcome::Unhandled { code }
            }
        }
    }

    fn accept_table(&mut self, payload: &[u8]) -> DispatchOutcome {
        match NegotiatedTable::decode(&mut PayloadReader::new(payload)) {
            Ok(mut table) => {
                let bound = table.bind(&self.registry);
                tracing::info!(
                    "Negotiated {} message types ({bound} handled locally)",
                    table.len()
                );
                self.table = Some(table);
                DispatchOutcome::Control
            }
            Err(e) => {
                tracing::warn!("Malformed message table from server: {e}");
                DispatchOutcome::Malformed
            }
        }
    }

    /// Send `payload` as `kind` using the server's code for it.
    pub fn send(&mut self, kind: MessageKind, payload: &[u8]) -> Result<(), SendError> {
        let table = self.table.as_ref().ok_or(SendError::NotNegotiated)?;
        let code = table
            .code_of(kind.ident)
            .ok_or(SendError::UnknownKind(kind.ident))?;
        self.transport.send(
            ConnectionId::SERVER,
            kind.delivery,
            encode_message(code, payload),
        )?;
        Ok(())
    }

    /// Send every queued message to the server. Returns the number sent;
    /// failures are logged.
    pub fn flush(&mut self, outbox: &mut Outbox) -> usize {
        let mut sent = 0;
        for message in outbox.drain() {
            if message.target != Target::Server {
                tracing::warn!("Client cannot address {:?}, dropping {}", message.target, message.kind.ident);
                continue;
            }
            match self.send(message.kind, &message.payload) {
                Ok(()) => sent += 1,
                Err(e) => tracing::debug!("Send of {} failed: {e}", message.kind.ident),
            }
        }
        sent
    }

    /// Block until the server's message table arrives.
    pub fn negotiate(&mut self, ctx: &mut C, policy: &RetryPolicy) -> Result<(), SetupError> {
        self.await_reply(
            ctx,
            policy,
            "negotiation",
            |peer| peer.request_message_types(),
            |peer, _| peer.is_negotiated().then_some(()),
        )
    }

    /// Send `request` and keep polling until `done` yields a value,
    /// retrying per `policy`.
    ///
    /// Every poll dispatches into `ctx`, so replies are consumed by the
    /// registered handlers while waiting.
    pub fn await_reply<R, D, V>(
        &mut self,
        ctx: &mut C,
        policy: &RetryPolicy,
        stage: &'static str,
        mut request: R,
        done: D,
    ) -> Result<V, SetupError>
    where
        R: FnMut(&mut Self) -> Result<(), SendError>,
        D: Fn(&Self, &C) -> Option<V>,
    {
        for attempt in 1..=policy.max_attempts {
            if !self.connected {
                return Err(SetupError::Disconnected { stage });
            }
            request(self)?;
            let deadline = Instant::now() + policy.attempt_timeout;
            loop {
                let received = self.poll(ctx);
                if let Some(value) = done(self, ctx) {
                    tracing::debug!("{stage} completed on attempt {attempt}");
                    return Ok(value);
                }
                if !self.connected {
                    return Err(SetupError::Disconnected { stage });
                }
                if Instant::now() >= deadline {
                    break;
                }
                if !received {
                    std::thread::sleep(policy.poll_interval);
                }
            }
            tracing::warn!(
                "{stage} attempt {attempt}/{} timed out after {:?}",
                policy.max_attempts,
                policy.attempt_timeout
            );
        }
        Err(SetupError::TimedOut {
            stage,
            attempts: policy.max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::Delivery;
    use crate::registry::{HandlerError, IncomingMessage};
    use crate::server_peer::ServerPeer;
    use crate::transport::memory::{MemoryClientTransport, MemoryServerTransport, memory_network};

    const HELLO: MessageKind = MessageKind::new("Hello", Delivery::ordered(0));
    const TICK: MessageKind = MessageKind::new("Tick", Delivery::sequenced(1));
    const SERVER_ONLY: MessageKind = MessageKind::new("ServerOnly", Delivery::ordered(0));

    type Server = ServerPeer<Vec<u16>, MemoryServerTransport>;
    type Client = ClientPeer<Vec<u16>, MemoryClientTransport>;

    fn record(ctx: &mut Vec<u16>, msg: &mut IncomingMessage<'_>) -> Result<(), HandlerError> {
        ctx.push(msg.reader.read_u16()?);
        Ok(())
    }

    fn quick() -> RetryPolicy {
        RetryPolicy {
            attempt_timeout: Duration::from_millis(30),
            max_attempts: 2,
            poll_interval: Duration::from_millis(1),
        }
    }

    fn pair() -> (Server, Client) {
        let (transport, connector) = memory_network();
        let mut server = ServerPeer::new(transport);
        // Server order differs from the client's registration order.
        server.declare(SERVER_ONLY).unwrap();
        server.register(TICK, record).unwrap();
        server.register(HELLO, record).unwrap();
        let client = ClientPeer::new(connector.connect().unwrap());
        (server, client)
    }

    /// Run the negotiation request/response by hand on one thread.
    fn negotiate(server: &mut Server, client: &mut Client) {
        client.request_message_types().unwrap();
        server.poll(&mut Vec::new());
        client.poll(&mut Vec::new());
        assert!(client.is_negotiated());
    }

    #[test]
    fn test_client_learns_server_codes() {
        let (mut server, mut client) = pair();
        client.register(HELLO, record).unwrap();
        negotiate(&mut server, &mut client);

        assert_eq!(client.server_code("ServerOnly"), Some(0));
        assert_eq!(client.server_code("Tick"), Some(1));
        assert_eq!(client.server_code("Hello"), Some(2));
    }

    #[test]
    fn test_single_handler_invocation_after_negotiation() {
        let (mut server, mut client) = pair();
        client.register(HELLO, record).unwrap();
        negotiate(&mut server, &mut client);

        // Server sends Hello with its own index.
        let id = server.connections()[0];
        server.send(id, HELLO, &5u16.to_le_bytes()).unwrap();

        let mut seen = Vec::new();
        client.poll(&mut seen);
        assert_eq!(seen, vec![5]);
    }

    #[test]
    fn test_client_send_uses_server_index() {
        let (mut server, mut client) = pair();
        negotiate(&mut server, &mut client);

        client.send(TICK, &3u16.to_le_bytes()).unwrap();
        client.send(HELLO, &4u16.to_le_bytes()).unwrap();

        let mut seen = Vec::new();
        server.poll(&mut seen);
        assert_eq!(seen, vec![3, 4]);
    }

    #[test]
    fn test_send_before_negotiation_fails() {
        let (_server, mut client) = pair();
        assert!(matches!(
            client.send(HELLO, &[]),
            Err(SendError::NotNegotiated)
        ));
    }

    #[test]
    fn test_send_unadvertised_kind_fails() {
        let (mut server, mut client) = pair();
        negotiate(&mut server, &mut client);
        let local_only = MessageKind::new("LocalOnly", Delivery::ordered(0));
        assert!(matches!(
            client.send(local_only, &[]),
            Err(SendError::UnknownKind("LocalOnly"))
        ));
    }

    #[test]
    fn test_unbound_server_index_ignored() {
        let (mut server, mut client) = pair();
        negotiate(&mut server, &mut client);

        let mut seen = Vec::new();
        // Code 0 is ServerOnly, which the client never registered.
        assert_eq!(
            client.dispatch(&mut seen, &[0, 0, 1, 0]),
            DispatchOutcome::Unhandled { code: 0 }
        );
        assert_eq!(
            client.dispatch(&mut seen, &[40, 0]),
            DispatchOutcome::Unhandled { code: 40 }
        );
        assert!(seen.is_empty());
    }

    #[test]
    fn test_handler_failure_reported_after_negotiation() {
        let (mut server, mut client) = pair();
        client.register(HELLO, record).unwrap();
        negotiate(&mut server, &mut client);

        let mut seen = Vec::new();
        // Hello is code 2 on the server; one payload byte short of a u16.
        assert_eq!(
            client.dispatch(&mut seen, &[2, 0, 1]),
            DispatchOutcome::Failed { code: 2 }
        );
        assert_eq!(
            client.dispatch(&mut seen, &[2, 0, 6, 0]),
            DispatchOutcome::Handled { code: 2 }
        );
        assert_eq!(seen, vec![6]);
    }

    #[test]
    fn test_registration_after_negotiation_is_bound() {
        let (mut server, mut client) = pair();
        negotiate(&mut server, &mut client);
        client.register(TICK, record).unwrap();

        let mut seen = Vec::new();
        assert_eq!(
            client.dispatch(&mut seen, &[1, 0, 9, 0]),
            DispatchOutcome::Handled { code: 1 }
        );
        assert_eq!(seen, vec![9]);
    }

    #[test]
    fn test_message_before_negotiation_dropped() {
        let (_server, mut client) = pair();
        client.register(HELLO, record).unwrap();
        let mut seen = Vec::new();
        assert_eq!(
            client.dispatch(&mut seen, &[2, 0, 1, 0]),
            DispatchOutcome::Unhandled { code: 2 }
        );
        assert!(seen.is_empty());
    }

    #[test]
    fn test_negotiation_times_out_without_server_loop() {
        let (_server, mut client) = pair();
        let result = client.negotiate(&mut Vec::new(), &quick());
        assert!(matches!(
            result,
            Err(SetupError::TimedOut {
                stage: "negotiation",
                attempts: 2
            })
        ));
    }

    #[test]
    fn test_negotiation_fails_fast_on_disconnect() {
        let (transport, connector) = memory_network();
        let mut client: Client = ClientPeer::new(connector.connect().unwrap());
        drop(transport);
        client.poll(&mut Vec::new());
        assert!(!client.is_connected());

        let result = client.negotiate(&mut Vec::new(), &quick());
        assert!(matches!(
            result,
            Err(SetupError::Disconnected {
                stage: "negotiation"
            })
        ));
    }

    #[test]
    fn test_negotiate_blocks_until_table_arrives() {
        let (transport, connector) = memory_network();
        let handle = std::thread::spawn(move || {
            let mut server: Server = ServerPeer::new(transport);
            server.register(HELLO, record).unwrap();
            let deadline = Instant::now() + Duration::from_secs(2);
            while Instant::now() < deadline {
                if !server.poll(&mut Vec::new()) {
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
        });

        let mut client: Client = ClientPeer::new(connector.connect().unwrap());
        client.negotiate(&mut Vec::new(), &RetryPolicy::default()).unwrap();
        assert_eq!(client.server_code("Hello"), Some(0));
        drop(client);
        handle.join().unwrap();
    }
}
