//! TCP transport running on a private tokio runtime.
//!
//! The server end owns an accept loop and one reader/writer task pair per
//! connection; the client end owns one pair for its server connection.
//! Tasks hand events to the peer loop through an unbounded channel drained
//! by [`Transport::poll`], and take outgoing packets from per-connection
//! channels, so protocol state is only ever touched on the loop thread.
//!
//! Each side writes an empty keepalive frame every `keepalive_interval`
//! and drops a connection that stays silent for `connection_timeout`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;

use super::{ConnectionId, IdGenerator, Transport, TransportError, TransportEvent};
use crate::delivery::{Delivery, SequencedLink};
use crate::framing::{FrameConfig, FrameError, Packet, read_frame, write_frame, write_packet};

/// Configuration shared by both TCP ends.
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Frame size limits.
    pub frame: FrameConfig,
    /// Maximum concurrent connections (server). Default: 128.
    pub max_connections: usize,
    /// Limit on establishing a connection (client). Default: 5 s.
    pub connect_timeout: Duration,
    /// A connection silent for this long is dropped. Default: 15 s.
    pub connection_timeout: Duration,
    /// Interval between keepalive frames. Default: 5 s.
    pub keepalive_interval: Duration,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            frame: FrameConfig::default(),
            max_connections: 128,
            connect_timeout: Duration::from_secs(5),
            connection_timeout: Duration::from_secs(15),
            keepalive_interval: Duration::from_secs(5),
        }
    }
}

fn build_runtime() -> Result<Runtime, TransportError> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("sphaira-net")
        .enable_io()
        .enable_time()
        .build()
        .map_err(TransportError::Runtime)
}

/// Error returned when the connection map is at capacity.
#[derive(Debug)]
pub(crate) struct ConnectionLimitReached;

/// Live connections and their outgoing queues, shared with the I/O tasks.
pub(crate) struct ConnectionMap {
    inner: RwLock<HashMap<ConnectionId, UnboundedSender<Packet>>>,
    max_connections: usize,
}

impl ConnectionMap {
    /// Create a new map with the given capacity limit.
    pub(crate) fn new(max_connections: usize) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            max_connections,
        }
    }

    /// Insert a connection. Returns `Err` if the map is at capacity.
    pub(crate) fn insert(
        &self,
        id: ConnectionId,
        outgoing: UnboundedSender<Packet>,
    ) -> Result<(), ConnectionLimitReached> {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if map.len() >= self.max_connections {
            return Err(ConnectionLimitReached);
        }
        map.insert(id, outgoing);
        Ok(())
    }

    /// Remove a connection by ID.
    pub(crate) fn remove(&self, id: &ConnectionId) -> Option<UnboundedSender<Packet>> {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    /// Outgoing queue of `id`.
    pub(crate) fn sender(&self, id: &ConnectionId) -> Option<UnboundedSender<Packet>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Live connection ids in ascending order.
    pub(crate) fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self
            .inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }
}

/// Server end of the TCP transport.
pub struct TcpServerTransport {
    runtime: Option<Runtime>,
    local_addr: SocketAddr,
    connections: Arc<ConnectionMap>,
    links: HashMap<ConnectionId, SequencedLink>,
    events: UnboundedReceiver<TransportEvent>,
    shutdown_tx: watch::Sender<bool>,
}

impl TcpServerTransport {
    /// Bind to `addr` and start accepting connections.
    pub fn bind(addr: SocketAddr, config: TcpConfig) -> Result<Self, TransportError> {
        let runtime = build_runtime()?;
        let listener = runtime
            .block_on(TcpListener::bind(addr))
            .map_err(|source| TransportError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| TransportError::Bind { addr, source })?;
        tracing::info!("Server listening on {local_addr}");

        let connections = Arc::new(ConnectionMap::new(config.max_connections));
        let (events_tx, events) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        runtime.spawn(accept_loop(
            listener,
            Arc::clone(&connections),
            events_tx,
            config,
            shutdown_rx,
        ));

        Ok(Self {
            runtime: Some(runtime),
            local_addr,
            connections,
            links: HashMap::new(),
            events,
            shutdown_tx,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting and close every connection.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Transport for TcpServerTransport {
    fn poll(&mut self) -> Option<TransportEvent> {
        let event = self.events.try_recv().ok()?;
        if let TransportEvent::Disconnected { connection, .. } = &event {
            self.links.remove(connection);
        }
        Some(event)
    }

    fn send(
        &mut self,
        to: ConnectionId,
        delivery: Delivery,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        let outgoing = self
            .connections
            .sender(&to)
            .ok_or(TransportError::UnknownConnection(to))?;
        let sequence = self.links.entry(to).or_default().stamp(delivery);
        outgoing
            .send(Packet {
                delivery,
                sequence,
                payload,
            })
            .map_err(|_| TransportError::Closed)
    }

    fn connections(&self) -> Vec<ConnectionId> {
        self.connections.ids()
    }
}

impl Drop for TcpServerTransport {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    connections: Arc<ConnectionMap>,
    events: UnboundedSender<TransportEvent>,
    config: TcpConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let id_gen = IdGenerator::new();

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (stream, peer_addr) = match result {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!("Accept failed: {e}");
                        continue;
                    }
                };
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::warn!("Failed to set TCP_NODELAY for {peer_addr}: {e}");
                }

                let id = id_gen.next_id();
                let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
                if connections.insert(id, outgoing_tx).is_err() {
                    tracing::warn!("Connection limit reached, rejecting {peer_addr}");
                    continue;
                }

                tracing::info!("Accepted connection {id:?} from {peer_addr}");
                let _ = events.send(TransportEvent::Connected(id));

                let task_connections = Arc::clone(&connections);
                tokio::spawn(drive_connection(
                    id,
                    stream,
                    outgoing_rx,
                    events.clone(),
                    config.clone(),
                    shutdown_rx.clone(),
                    move || {
                        task_connections.remove(&id);
                    },
                ));
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    tracing::info!("Server shutting down");
                    break;
                }
            }
        }
    }
}

/// Run one connection until either side closes it, then report it gone.
async fn drive_connection<F>(
    id: ConnectionId,
    stream: TcpStream,
    outgoing: UnboundedReceiver<Packet>,
    events: UnboundedSender<TransportEvent>,
    config: TcpConfig,
    shutdown_rx: watch::Receiver<bool>,
    on_close: F,
) where
    F: FnOnce() + Send + 'static,
{
    let (reader, writer) = stream.into_split();
    let writer_task = tokio::spawn(write_loop(
        id,
        writer,
        outgoing,
        config.clone(),
        shutdown_rx.clone(),
    ));

    let reason = read_loop(id, reader, &events, &config, shutdown_rx).await;

    // Dropping the write half closes our direction of the stream.
    writer_task.abort();
    on_close();
    tracing::info!("Connection {id:?} closed: {reason}");
    let _ = events.send(TransportEvent::Disconnected {
        connection: id,
        reason,
    });
}

async fn read_loop(
    id: ConnectionId,
    mut reader: OwnedReadHalf,
    events: &UnboundedSender<TransportEvent>,
    config: &TcpConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> String {
    let mut link = SequencedLink::new();
    loop {
        tokio::select! {
            result = tokio::time::timeout(config.connection_timeout, read_frame(&mut reader, &config.frame)) => {
                let body = match result {
                    Err(_) => return format!("no traffic for {:?}", config.connection_timeout),
                    Ok(Err(FrameError::ConnectionClosed)) => return "closed by peer".to_string(),
                    Ok(Err(e)) => return e.to_string(),
                    Ok(Ok(body)) => body,
                };
                if body.is_empty() {
                    continue;
                }
                let packet = match Packet::decode(&body) {
                    Ok(packet) => packet,
                    Err(e) => {
                        tracing::warn!("Dropping bad packet from {id:?}: {e}");
                        continue;
                    }
                };
                if !link.admit(packet.delivery, packet.sequence) {
                    tracing::trace!("Dropped stale packet {} from {id:?}", packet.sequence);
                    continue;
                }
                if events.send(TransportEvent::Message { from: id, payload: packet.payload }).is_err() {
                    return "transport dropped".to_string();
                }
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    return "shutdown".to_string();
                }
            }
        }
    }
}

async fn write_loop(
    id: ConnectionId,
    mut writer: OwnedWriteHalf,
    mut outgoing: UnboundedReceiver<Packet>,
    config: TcpConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut keepalive = tokio::time::interval(config.keepalive_interval);
    loop {
        let result = tokio::select! {
            packet = outgoing.recv() => match packet {
                Some(packet) => write_packet(&mut writer, &packet, &config.frame).await,
                None => break,
            },
            _ = keepalive.tick() => write_frame(&mut writer, &[], &config.frame).await,
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
                Ok(())
            }
        };
        if let Err(e) = result {
            tracing::debug!("Write to {id:?} failed: {e}");
            break;
        }
    }
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Attempting to establish a TCP connection.
    Connecting,
    /// TCP connection established, ready for communication.
    Connected,
    /// Connection lost or intentionally closed.
    Disconnected,
}

/// Observable connection state backed by a [`watch`] channel.
///
/// The I/O tasks update it and the loop reads it without blocking.
pub struct ConnectionStateWatch {
    tx: watch::Sender<ConnectionState>,
    rx: watch::Receiver<ConnectionState>,
}

impl Default for ConnectionStateWatch {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStateWatch {
    /// Create a new watch initialized to [`ConnectionState::Disconnected`].
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(ConnectionState::Disconnected);
        Self { tx, rx }
    }

    /// Set the current connection state.
    pub fn set(&self, state: ConnectionState) {
        let _ = self.tx.send(state);
    }

    /// Return the current state without blocking.
    pub fn current(&self) -> ConnectionState {
        *self.rx.borrow()
    }
}

/// Client end of the TCP transport.
pub struct TcpClientTransport {
    runtime: Option<Runtime>,
    outgoing: UnboundedSender<Packet>,
    events: UnboundedReceiver<TransportEvent>,
    link: SequencedLink,
    state: Arc<ConnectionStateWatch>,
    shutdown_tx: watch::Sender<bool>,
}

impl TcpClientTransport {
    /// Connect to the server at `addr`.
    ///
    /// Blocks until the TCP handshake completes or `connect_timeout` passes.
    pub fn connect(addr: SocketAddr, config: TcpConfig) -> Result<Self, TransportError> {
        let runtime = build_runtime()?;
        let state = Arc::new(ConnectionStateWatch::new());
        state.set(ConnectionState::Connecting);

        let connect = tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr));
        let stream = match runtime.block_on(connect) {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                state.set(ConnectionState::Disconnected);
                return Err(TransportError::ConnectFailed { addr, source });
            }
            Err(_) => {
                state.set(ConnectionState::Disconnected);
                return Err(TransportError::ConnectTimedOut {
                    addr,
                    timeout: config.connect_timeout,
                });
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            tracing::warn!("Failed to set TCP_NODELAY: {e}");
        }
        state.set(ConnectionState::Connected);
        tracing::info!("Connected to {addr}");

        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let _ = events_tx.send(TransportEvent::Connected(ConnectionId::SERVER));

        let task_state = Arc::clone(&state);
        runtime.spawn(drive_connection(
            ConnectionId::SERVER,
            stream,
            outgoing_rx,
            events_tx,
            config,
            shutdown_rx,
            move || task_state.set(ConnectionState::Disconnected),
        ));

        Ok(Self {
            runtime: Some(runtime),
            outgoing,
            events,
            link: SequencedLink::new(),
            state,
            shutdown_tx,
        })
    }

    /// Return the connection state watch.
    pub fn state(&self) -> &Arc<ConnectionStateWatch> {
        &self.state
    }

    /// Disconnect from the server.
    ///
    /// Signals background tasks to exit and transitions state to
    /// [`ConnectionState::Disconnected`] immediately.
    pub fn disconnect(&self) {
        let _ = self.shutdown_tx.send(true);
        self.state.set(ConnectionState::Disconnected);
    }
}

impl Transport for TcpClientTransport {
    fn poll(&mut self) -> Option<TransportEvent> {
        self.events.try_recv().ok()
    }

    fn send(
        &mut self,
        to: ConnectionId,
        delivery: Delivery,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        if to != ConnectionId::SERVER {
            return Err(TransportError::UnknownConnection(to));
        }
        if self.state.current() != ConnectionState::Connected {
            return Err(TransportError::Closed);
        }
        let packet = Packet {
            delivery,
            sequence: self.link.stamp(delivery),
            payload,
        };
        self.outgoing.send(packet).map_err(|_| TransportError::Closed)
    }

    fn connections(&self) -> Vec<ConnectionId> {
        if self.state.current() == ConnectionState::Connected {
            vec![ConnectionId::SERVER]
        } else {
            Vec::new()
        }
    }
}

impl Drop for TcpClientTransport {
    fn drop(&mut self) {
        self.disconnect();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn local_server(config: TcpConfig) -> TcpServerTransport {
        TcpServerTransport::bind("127.0.0.1:0".parse().unwrap(), config).unwrap()
    }

    /// Poll until `pred` matches an event or two seconds pass.
    fn wait_for<T: Transport>(
        transport: &mut T,
        mut pred: impl FnMut(&TransportEvent) -> bool,
    ) -> Option<TransportEvent> {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            match transport.poll() {
                Some(event) if pred(&event) => return Some(event),
                Some(_) => {}
                None => std::thread::sleep(Duration::from_millis(5)),
            }
        }
        None
    }

    #[test]
    fn test_server_binds_to_ephemeral_port() {
        let server = local_server(TcpConfig::default());
        assert_ne!(server.local_addr().port(), 0);
    }

    #[test]
    fn test_client_connects_and_exchanges_messages() {
        let mut server = local_server(TcpConfig::default());
        let mut client =
            TcpClientTransport::connect(server.local_addr(), TcpConfig::default()).unwrap();
        assert_eq!(client.state().current(), ConnectionState::Connected);

        let Some(TransportEvent::Connected(id)) =
            wait_for(&mut server, |e| matches!(e, TransportEvent::Connected(_)))
        else {
            panic!("server never saw the connection");
        };
        assert_eq!(server.connections(), vec![id]);

        client
            .send(ConnectionId::SERVER, Delivery::ordered(0), vec![1, 0, 7])
            .unwrap();
        let event = wait_for(&mut server, |e| matches!(e, TransportEvent::Message { .. }));
        assert_eq!(
            event,
            Some(TransportEvent::Message {
                from: id,
                payload: vec![1, 0, 7]
            })
        );

        server.send(id, Delivery::sequenced(1), vec![9]).unwrap();
        let event = wait_for(&mut client, |e| matches!(e, TransportEvent::Message { .. }));
        assert_eq!(
            event,
            Some(TransportEvent::Message {
                from: ConnectionId::SERVER,
                payload: vec![9]
            })
        );
    }

    #[test]
    fn test_client_disconnect_reported_to_server() {
        let mut server = local_server(TcpConfig::default());
        let client =
            TcpClientTransport::connect(server.local_addr(), TcpConfig::default()).unwrap();
        wait_for(&mut server, |e| matches!(e, TransportEvent::Connected(_)))
            .expect("connected");

        drop(client);

        assert!(
            wait_for(&mut server, |e| matches!(e, TransportEvent::Disconnected { .. })).is_some(),
            "server should notice the closed socket"
        );
        assert!(server.connections().is_empty());
    }

    #[test]
    fn test_max_connections_enforced() {
        let mut server = local_server(TcpConfig {
            max_connections: 1,
            ..TcpConfig::default()
        });
        let _first = TcpClientTransport::connect(server.local_addr(), TcpConfig::default()).unwrap();
        wait_for(&mut server, |e| matches!(e, TransportEvent::Connected(_))).expect("first");

        let mut second =
            TcpClientTransport::connect(server.local_addr(), TcpConfig::default()).unwrap();
        assert!(
            wait_for(&mut second, |e| matches!(e, TransportEvent::Disconnected { .. })).is_some(),
            "rejected client should see its connection closed"
        );
        assert_eq!(server.connections().len(), 1);
    }

    #[test]
    fn test_silent_peer_times_out() {
        let mut server = local_server(TcpConfig {
            connection_timeout: Duration::from_millis(200),
            ..TcpConfig::default()
        });
        // A raw socket that never writes a frame.
        let _raw = std::net::TcpStream::connect(server.local_addr()).unwrap();
        wait_for(&mut server, |e| matches!(e, TransportEvent::Connected(_))).expect("connected");

        let event = wait_for(&mut server, |e| matches!(e, TransportEvent::Disconnected { .. }));
        assert!(
            matches!(event, Some(TransportEvent::Disconnected { reason, .. }) if reason.starts_with("no traffic")),
        );
    }

    #[test]
    fn test_keepalive_holds_idle_connection() {
        let config = TcpConfig {
            connection_timeout: Duration::from_millis(400),
            keepalive_interval: Duration::from_millis(50),
            ..TcpConfig::default()
        };
        let mut server = local_server(config.clone());
        let client = TcpClientTransport::connect(server.local_addr(), config).unwrap();
        wait_for(&mut server, |e| matches!(e, TransportEvent::Connected(_))).expect("connected");

        std::thread::sleep(Duration::from_millis(800));
        assert_eq!(server.connections().len(), 1);
        assert_eq!(client.state().current(), ConnectionState::Connected);
    }

    #[test]
    fn test_connect_refused() {
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let result = TcpClientTransport::connect(addr, TcpConfig::default());
        assert!(matches!(result, Err(TransportError::ConnectFailed { .. })));
    }

    #[test]
    fn test_connection_state_transitions() {
        let watch = ConnectionStateWatch::new();
        assert_eq!(watch.current(), ConnectionState::Disconnected);

        watch.set(ConnectionState::Connecting);
        assert_eq!(watch.current(), ConnectionState::Connecting);

        watch.set(ConnectionState::Connected);
        assert_eq!(watch.current(), ConnectionState::Connected);
    }

    #[test]
    fn test_send_after_disconnect_fails() {
        let server = local_server(TcpConfig::default());
        let mut client =
            TcpClientTransport::connect(server.local_addr(), TcpConfig::default()).unwrap();
        client.disconnect();
        assert!(matches!(
            client.send(ConnectionId::SERVER, Delivery::ordered(0), vec![]),
            Err(TransportError::Closed)
        ));
        assert!(client.connections().is_empty());
    }
}
