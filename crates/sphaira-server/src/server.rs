//! Server loop: world bootstrap, position relay and session reconciliation.
//!
//! All protocol state lives in [`ServerState`], owned by the loop thread.
//! Handlers mutate it and queue replies in its outbox; each tick the
//! [`Server`] polls the transport, drops sessions whose connection is gone,
//! and flushes the outbox.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use sphaira_config::Config;
use sphaira_multiplayer::{
    PLAYER_INFO, PLAYER_POS, PositionRelay, PositionUpdate, WORLD_INFO,
};
use sphaira_net::{
    ConnectionId, HandlerError, IncomingMessage, Outbox, ServerPeer, Transport, WirePayload,
};

use crate::error::ServerError;
use crate::session::SessionTable;
use crate::world::ServerWorld;

/// State shared by the server's message handlers.
#[derive(Debug)]
pub struct ServerState {
    /// Live sessions.
    pub sessions: SessionTable,
    /// World parameters and clock.
    pub world: ServerWorld,
    /// Messages queued during the current tick.
    pub outbox: Outbox,
}

impl ServerState {
    /// Create state for an empty server.
    pub fn new(world: ServerWorld, max_players: usize) -> Self {
        Self {
            sessions: SessionTable::new(max_players),
            world,
            outbox: Outbox::new(),
        }
    }

    /// Session id of `connection`, creating the session on first contact.
    /// A new session triggers a roster broadcast that includes it.
    pub fn session_for(&mut self, connection: ConnectionId) -> Option<u16> {
        match self.sessions.get_or_create(connection) {
            Ok((id, created)) => {
                if created {
                    tracing::info!("Player {id} joined on {connection:?}");
                    self.broadcast_roster();
                }
                Some(id)
            }
            Err(e) => {
                tracing::warn!("No session for {connection:?}: {e}");
                None
            }
        }
    }

    /// Queue the current roster for every session.
    pub fn broadcast_roster(&mut self) {
        let roster = self.sessions.roster();
        tracing::debug!("Broadcasting roster {:?}", roster.ids);
        self.outbox
            .send_to_many(self.sessions.connections(), PLAYER_INFO, roster.to_bytes());
    }

    /// Drop sessions whose connection is not in `live`; broadcast the roster
    /// if any were dropped. Returns the number dropped.
    pub fn reconcile(&mut self, live: &[ConnectionId]) -> usize {
        let removed = self.sessions.retain_live(live);
        for session in &removed {
            tracing::info!("Player {} left ({:?})", session.id, session.connection);
        }
        if !removed.is_empty() {
            self.broadcast_roster();
        }
        removed.len()
    }
}

fn reject_unseated(connection: ConnectionId) -> HandlerError {
    HandlerError::Rejected(format!("{connection:?} has no session"))
}

fn handle_world_info(
    state: &mut ServerState,
    msg: &mut IncomingMessage<'_>,
) -> Result<(), HandlerError> {
    let id = state
        .session_for(msg.sender)
        .ok_or_else(|| reject_unseated(msg.sender))?;
    let reply = state.world.bootstrap(id);
    tracing::debug!("Bootstrapping player {id}");
    state.outbox.send_to(msg.sender, WORLD_INFO, reply.to_bytes());
    Ok(())
}

fn handle_player_pos(
    state: &mut ServerState,
    msg: &mut IncomingMessage<'_>,
) -> Result<(), HandlerError> {
    let update: PositionUpdate = msg.read()?;
    let id = state
        .session_for(msg.sender)
        .ok_or_else(|| reject_unseated(msg.sender))?;
    if let Some(session) = state.sessions.get_mut(msg.sender) {
        session.position = update.position;
    }
    let relay = PositionRelay {
        id,
        position: update.position,
    };
    state
        .outbox
        .send_to_many(state.sessions.others(msg.sender), PLAYER_POS, relay.to_bytes());
    Ok(())
}

/// The server peer together with its state and loop timing.
pub struct Server<T> {
    peer: ServerPeer<ServerState, T>,
    state: ServerState,
    poll_interval: Duration,
}

impl<T: Transport> Server<T> {
    /// Build a server around a listening transport.
    pub fn new(transport: T, config: &Config) -> Result<Self, ServerError> {
        Self::with_world(transport, ServerWorld::from_config(&config.world), config)
    }

    /// Build a server with an explicit world.
    pub fn with_world(transport: T, world: ServerWorld, config: &Config) -> Result<Self, ServerError> {
        let mut peer = ServerPeer::new(transport);
        peer.register(WORLD_INFO, handle_world_info)?;
        peer.declare(PLAYER_INFO)?;
        peer.register(PLAYER_POS, handle_player_pos)?;

        let max_players = usize::try_from(config.network.max_players).unwrap_or(usize::MAX);
        Ok(Self {
            peer,
            state: ServerState::new(world, max_players),
            poll_interval: config.network.poll_interval(),
        })
    }

    /// Run one loop iteration: poll, reconcile, flush.
    ///
    /// Returns whether the poll received anything.
    pub fn tick(&mut self) -> bool {
        let received = self.peer.poll(&mut self.state);
        let live = self.peer.connections();
        self.state.reconcile(&live);
        self.peer.flush(&mut self.state.outbox);
        received
    }

    /// Tick until `stop` is set, sleeping between idle polls.
    pub fn run(&mut self, stop: &AtomicBool) {
        tracing::info!(
            "World ready: seed {}, radius {}, density {}",
            self.state.world.seed(),
            self.state.world.radius(),
            self.state.world.density()
        );
        while !stop.load(Ordering::Relaxed) {
            if !self.tick() {
                std::thread::sleep(self.poll_interval);
            }
        }
        tracing::info!("Server loop stopped with {} players", self.state.sessions.len());
    }

    /// Protocol state.
    pub fn state(&self) -> &ServerState {
        &self.state
    }

    /// Live sessions.
    pub fn sessions(&self) -> &SessionTable {
        &self.state.sessions
    }

    /// The world.
    pub fn world(&self) -> &ServerWorld {
        &self.state.world
    }

    /// The server peer.
    pub fn peer(&self) -> &ServerPeer<ServerState, T> {
        &self.peer
    }

    /// The transport, mutably.
    pub fn transport_mut(&mut self) -> &mut T {
        self.peer.transport_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use sphaira_multiplayer::{Roster, WorldInfo};
    use sphaira_net::{
        ClientPeer, MemoryClientTransport, MemoryConnector, MemoryServerTransport, MessageKind,
        memory_network,
    };

    /// What a raw test client has seen.
    #[derive(Default)]
    struct Seen {
        world: Vec<WorldInfo>,
        rosters: Vec<Roster>,
        relays: Vec<PositionRelay>,
    }

    fn worlds(seen: &mut Seen) -> &mut Vec<WorldInfo> {
        &mut seen.world
    }

    fn rosters(seen: &mut Seen) -> &mut Vec<Roster> {
        &mut seen.rosters
    }

    fn relays(seen: &mut Seen) -> &mut Vec<PositionRelay> {
        &mut seen.relays
    }

    fn record<P: WirePayload + 'static>(
        pick: fn(&mut Seen) -> &mut Vec<P>,
    ) -> impl FnMut(&mut Seen, &mut IncomingMessage<'_>) -> Result<(), HandlerError> + Send + 'static
    {
        move |seen: &mut Seen, msg: &mut IncomingMessage<'_>| {
            let payload = P::read(&mut msg.reader)?;
            pick(seen).push(payload);
            Ok(())
        }
    }

    struct TestClient {
        peer: ClientPeer<Seen, MemoryClientTransport>,
        seen: Seen,
    }

    impl TestClient {
        fn connect(connector: &MemoryConnector) -> Self {
            let mut peer = ClientPeer::new(connector.connect().unwrap());
            peer.register(WORLD_INFO, record(worlds)).unwrap();
            peer.register(PLAYER_INFO, record(rosters)).unwrap();
            peer.register(PLAYER_POS, record(relays)).unwrap();
            Self {
                peer,
                seen: Seen::default(),
            }
        }

        fn send(&mut self, kind: MessageKind, payload: &[u8]) {
            self.peer.send(kind, payload).unwrap();
        }

        fn poll(&mut self) {
            self.peer.poll(&mut self.seen);
        }
    }

    fn setup() -> (Server<MemoryServerTransport>, MemoryConnector) {
        let (transport, connector) = memory_network();
        let server =
            Server::with_world(transport, ServerWorld::new(7, 8.0, 1024.0), &Config::default())
                .unwrap();
        (server, connector)
    }

    /// Connect a test client and complete negotiation.
    fn join_test_client(
        server: &mut Server<MemoryServerTransport>,
        connector: &MemoryConnector,
    ) -> TestClient {
        let mut client = TestClient::connect(connector);
        client.peer.request_message_types().unwrap();
        server.tick();
        client.poll();
        assert!(client.peer.is_negotiated());
        client
    }

    fn bootstrap(server: &mut Server<MemoryServerTransport>, client: &mut TestClient) -> u16 {
        client.send(WORLD_INFO, &[]);
        server.tick();
        client.poll();
        client.seen.world.last().expect("bootstrap reply").assigned_id
    }

    #[test]
    fn test_registration_order() {
        let (server, _connector) = setup();
        let idents: Vec<_> = server.peer().registry().idents().collect();
        assert_eq!(idents, vec!["WorldInfo", "PlayerInfo", "PlayerPos"]);
    }

    #[test]
    fn test_negotiation_creates_no_session() {
        let (mut server, connector) = setup();
        let _client = join_test_client(&mut server, &connector);
        assert!(server.sessions().is_empty());
    }

    #[test]
    fn test_bootstrap_reply_to_requester_only() {
        let (mut server, connector) = setup();
        let mut a = join_test_client(&mut server, &connector);
        let mut b = join_test_client(&mut server, &connector);

        assert_eq!(bootstrap(&mut server, &mut a), 0);
        b.poll();
        assert!(b.seen.world.is_empty(), "only the requester gets WorldInfo");

        let info = a.seen.world[0];
        assert_eq!(info.seed, 7);
        assert_eq!(info.radius, 8.0);
        assert_eq!(info.density, 1024.0);
    }

    #[test]
    fn test_roster_broadcast_on_join_includes_new_player() {
        let (mut server, connector) = setup();
        let mut a = join_test_client(&mut server, &connector);
        let mut b = join_test_client(&mut server, &connector);

        bootstrap(&mut server, &mut a);
        assert_eq!(a.seen.rosters, vec![Roster { ids: vec![0] }]);

        bootstrap(&mut server, &mut b);
        a.poll();
        assert_eq!(a.seen.rosters.last(), Some(&Roster { ids: vec![0, 1] }));
        assert_eq!(b.seen.rosters, vec![Roster { ids: vec![0, 1] }]);
    }

    #[test]
    fn test_position_relayed_to_others_only() {
        let (mut server, connector) = setup();
        let mut a = join_test_client(&mut server, &connector);
        let mut b = join_test_client(&mut server, &connector);
        let mut c = join_test_client(&mut server, &connector);
        for client in [&mut a, &mut b, &mut c] {
            bootstrap(&mut server, client);
        }

        let position = Vec3::new(1.0, 2.0, 3.0);
        a.send(PLAYER_POS, &PositionUpdate { position }.to_bytes());
        server.tick();
        for client in [&mut a, &mut b, &mut c] {
            client.poll();
        }

        assert!(a.seen.relays.is_empty(), "sender never gets its own relay");
        assert_eq!(b.seen.relays, vec![PositionRelay { id: 0, position }]);
        assert_eq!(c.seen.relays, vec![PositionRelay { id: 0, position }]);

        let stored = server.sessions().iter().find(|s| s.id == 0).unwrap();
        assert_eq!(stored.position, position);
    }

    #[test]
    fn test_position_before_bootstrap_creates_session() {
        let (mut server, connector) = setup();
        let mut a = join_test_client(&mut server, &connector);
        a.send(PLAYER_POS, &PositionUpdate { position: Vec3::X }.to_bytes());
        server.tick();
        a.poll();
        assert_eq!(server.sessions().len(), 1);
        assert_eq!(a.seen.rosters, vec![Roster { ids: vec![0] }]);
    }

    #[test]
    fn test_malformed_position_dropped() {
        let (mut server, connector) = setup();
        let mut a = join_test_client(&mut server, &connector);
        a.send(PLAYER_POS, &[1, 2, 3]);
        server.tick();
        assert!(server.sessions().is_empty());
    }

    #[test]
    fn test_departure_broadcasts_roster_once() {
        let (mut server, connector) = setup();
        let mut a = join_test_client(&mut server, &connector);
        let mut b = join_test_client(&mut server, &connector);
        bootstrap(&mut server, &mut a);
        bootstrap(&mut server, &mut b);
        a.poll();
        let before = a.seen.rosters.len();

        drop(b);
        server.tick();
        server.tick();
        a.poll();

        assert_eq!(a.seen.rosters.len(), before + 1, "exactly one roster per change");
        assert_eq!(a.seen.rosters.last(), Some(&Roster { ids: vec![0] }));
        assert_eq!(server.sessions().len(), 1);
    }

    #[test]
    fn test_no_roster_without_membership_change() {
        let (mut server, connector) = setup();
        let mut a = join_test_client(&mut server, &connector);
        bootstrap(&mut server, &mut a);
        for _ in 0..5 {
            server.tick();
        }
        a.poll();
        assert_eq!(a.seen.rosters.len(), 1);
    }

    #[test]
    fn test_freed_id_reused() {
        let (mut server, connector) = setup();
        let mut a = join_test_client(&mut server, &connector);
        let mut b = join_test_client(&mut server, &connector);
        let mut c = join_test_client(&mut server, &connector);
        bootstrap(&mut server, &mut a);
        assert_eq!(bootstrap(&mut server, &mut b), 1);
        bootstrap(&mut server, &mut c);

        drop(b);
        server.tick();

        let mut d = join_test_client(&mut server, &connector);
        assert_eq!(bootstrap(&mut server, &mut d), 1);
    }

    #[test]
    fn test_full_server_ignores_extra_player() {
        let (transport, connector) = memory_network();
        let mut config = Config::default();
        config.network.max_players = 1;
        let mut server =
            Server::with_world(transport, ServerWorld::new(7, 8.0, 1024.0), &config).unwrap();

        let mut a = join_test_client(&mut server, &connector);
        let mut b = join_test_client(&mut server, &connector);
        bootstrap(&mut server, &mut a);

        b.send(WORLD_INFO, &[]);
        server.tick();
        b.poll();
        assert!(b.seen.world.is_empty());
        assert_eq!(server.sessions().len(), 1);
    }

    #[test]
    fn test_run_stops_on_flag() {
        let (mut server, _connector) = setup();
        let stop = AtomicBool::new(true);
        server.run(&stop);
    }
}
