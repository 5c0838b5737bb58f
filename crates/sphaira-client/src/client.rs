//! Client loop: join handshake, position reporting and remote smoothing.
//!
//! Joining is two blocking exchanges with bounded retries: negotiate the
//! message table, then request `WorldInfo` until the bootstrap reply lands.
//! After that the client runs one [`Client::update`] per local frame.

use std::time::{Duration, Instant};

use glam::Vec3;
use sphaira_config::Config;
use sphaira_multiplayer::{
    DEFAULT_SMOOTHING, PLAYER_INFO, PLAYER_POS, PositionRelay, PositionSendPolicy, PositionUpdate,
    Roster, SendPolicyConfig, WORLD_INFO, WorldClock, WorldInfo, WorldParameters,
};
use sphaira_net::{
    ClientPeer, HandlerError, IncomingMessage, Outbox, RegistryError, RetryPolicy, Transport,
};

use crate::error::JoinError;
use crate::remote::RemotePlayers;

/// Tuning for a client, usually derived from [`Config`].
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Retry bounds for negotiation and bootstrap.
    pub retry: RetryPolicy,
    /// Position send policy.
    pub send_policy: SendPolicyConfig,
    /// Fraction of the remaining distance remote views close per update.
    pub smoothing: f32,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            send_policy: SendPolicyConfig::default(),
            smoothing: DEFAULT_SMOOTHING,
        }
    }
}

impl ClientSettings {
    /// Settings from the join, sync and network sections.
    pub fn from_config(config: &Config) -> Self {
        Self {
            retry: RetryPolicy {
                attempt_timeout: config.join.attempt_timeout(),
                max_attempts: config.join.max_attempts,
                poll_interval: config.network.poll_interval(),
            },
            send_policy: SendPolicyConfig {
                min_interval: config.sync.min_send_interval(),
                heartbeat: config.sync.heartbeat_interval(),
                movement_threshold: config.sync.movement_threshold,
            },
            smoothing: config.sync.smoothing_factor,
        }
    }
}

/// State shared by the client's message handlers.
#[derive(Debug, Default)]
pub struct ClientState {
    /// World parameters, once bootstrapped.
    pub world: Option<WorldParameters>,
    /// Server clock estimate, once bootstrapped.
    pub clock: Option<WorldClock>,
    /// Other players.
    pub remotes: RemotePlayers,
    /// Messages queued during the current update.
    pub outbox: Outbox,
}

fn handle_world_info(
    state: &mut ClientState,
    msg: &mut IncomingMessage<'_>,
) -> Result<(), HandlerError> {
    let info: WorldInfo = msg.read()?;
    if state.world.is_some() {
        tracing::debug!("Replacing world parameters with a newer bootstrap");
    }
    tracing::info!(
        "Joined as player {} (seed {}, radius {})",
        info.assigned_id,
        info.seed,
        info.radius
    );
    state.remotes.set_self(info.assigned_id);
    state.clock = Some(WorldClock::new(info.server_elapsed, Instant::now()));
    state.world = Some(WorldParameters::from(info));
    Ok(())
}

fn handle_player_info(
    state: &mut ClientState,
    msg: &mut IncomingMessage<'_>,
) -> Result<(), HandlerError> {
    let roster: Roster = msg.read()?;
    tracing::debug!("Roster {:?}", roster.ids);
    state.remotes.apply_roster(&roster);
    Ok(())
}

fn handle_player_pos(
    state: &mut ClientState,
    msg: &mut IncomingMessage<'_>,
) -> Result<(), HandlerError> {
    let relay: PositionRelay = msg.read()?;
    state.remotes.apply_relay(&relay);
    Ok(())
}

/// A client peer together with its state and send policy.
pub struct Client<T> {
    peer: ClientPeer<ClientState, T>,
    state: ClientState,
    settings: ClientSettings,
    send_policy: PositionSendPolicy,
}

impl<T: Transport> Client<T> {
    /// Wrap a connected transport and register the game handlers.
    pub fn new(transport: T, settings: ClientSettings) -> Result<Self, RegistryError> {
        let mut peer = ClientPeer::new(transport);
        peer.register(WORLD_INFO, handle_world_info)?;
        peer.register(PLAYER_INFO, handle_player_info)?;
        peer.register(PLAYER_POS, handle_player_pos)?;
        Ok(Self {
            peer,
            state: ClientState::default(),
            send_policy: PositionSendPolicy::new(settings.send_policy),
            settings,
        })
    }

    /// Negotiate and bootstrap, blocking until the world is known or the
    /// retry budget runs out.
    pub fn join(&mut self) -> Result<WorldParameters, JoinError> {
        let policy = &self.settings.retry;
        self.peer.negotiate(&mut self.state, policy)?;
        let world = self.peer.await_reply(
            &mut self.state,
            policy,
            "bootstrap",
            |peer| peer.send(WORLD_INFO, &[]),
            |_, state| state.world,
        )?;
        self.send_policy = PositionSendPolicy::new(self.settings.send_policy);
        Ok(world)
    }

    /// Run one frame: dispatch what arrived, maybe queue the local position,
    /// advance remote smoothing, and flush.
    ///
    /// Returns whether a position update was sent.
    pub fn update(&mut self, dt: Duration, position: Vec3) -> bool {
        self.peer.poll(&mut self.state);

        let mut queued = false;
        if self.is_joined() && self.send_policy.update(dt, position) {
            self.state
                .outbox
                .send_payload(PLAYER_POS, &PositionUpdate { position });
            queued = true;
        }
        self.state.remotes.tick(self.settings.smoothing);
        let sent = self.peer.flush(&mut self.state.outbox);
        queued && sent > 0
    }

    /// Whether bootstrap completed and the connection is still up.
    pub fn is_joined(&self) -> bool {
        self.state.world.is_some() && self.peer.is_connected()
    }

    /// Whether the transport still reports the server.
    pub fn is_connected(&self) -> bool {
        self.peer.is_connected()
    }

    /// World parameters, once bootstrapped.
    pub fn world(&self) -> Option<&WorldParameters> {
        self.state.world.as_ref()
    }

    /// Session id assigned by the server.
    pub fn player_id(&self) -> Option<u16> {
        self.state.world.map(|world| world.assigned_id)
    }

    /// Estimated server elapsed seconds.
    pub fn server_time(&self) -> Option<f64> {
        self.state.clock.map(|clock| clock.elapsed_seconds())
    }

    /// Other players.
    pub fn remotes(&self) -> &RemotePlayers {
        &self.state.remotes
    }

    /// The settings in use.
    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// The client peer.
    pub fn peer(&self) -> &ClientPeer<ClientState, T> {
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
    use sphaira_net::{ConnectionId, WirePayload};

    fn deliver<P: WirePayload>(
        state: &mut ClientState,
        handler: fn(&mut ClientState, &mut IncomingMessage<'_>) -> Result<(), HandlerError>,
        payload: &P,
    ) {
        let bytes = payload.to_bytes();
        let mut msg = IncomingMessage::new(ConnectionId::SERVER, 0, &bytes);
        handler(state, &mut msg).unwrap();
    }

    fn world_info(assigned_id: u16) -> WorldInfo {
        WorldInfo {
            seed: 11,
            radius: 8.0,
            density: 1024.0,
            server_elapsed: 30.0,
            assigned_id,
        }
    }

    #[test]
    fn test_bootstrap_sets_world_and_clock() {
        let mut state = ClientState::default();
        deliver(&mut state, handle_world_info, &world_info(3));

        let world = state.world.unwrap();
        assert_eq!(world.assigned_id, 3);
        assert_eq!(world.seed, 11);
        assert!(state.clock.unwrap().elapsed_seconds() >= 30.0);
        assert_eq!(state.remotes.self_id(), Some(3));
    }

    #[test]
    fn test_roster_before_bootstrap_excludes_self_after() {
        let mut state = ClientState::default();
        deliver(&mut state, handle_player_info, &Roster { ids: vec![0, 1] });
        deliver(&mut state, handle_world_info, &world_info(1));
        let ids: Vec<_> = state.remotes.iter().map(|view| view.id()).collect();
        assert_eq!(ids, vec![0]);
    }

    #[test]
    fn test_relay_updates_view() {
        let mut state = ClientState::default();
        deliver(&mut state, handle_world_info, &world_info(0));
        let position = Vec3::new(0.0, 8.0, 0.0);
        deliver(&mut state, handle_player_pos, &PositionRelay { id: 4, position });
        assert_eq!(state.remotes.get(4).unwrap().target(), position);
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let mut state = ClientState::default();
        let mut msg = IncomingMessage::new(ConnectionId::SERVER, 0, &[1, 2]);
        assert!(handle_player_pos(&mut state, &mut msg).is_err());
        assert!(state.remotes.is_empty());
    }

    #[test]
    fn test_settings_from_default_config() {
        let settings = ClientSettings::from_config(&Config::default());
        assert_eq!(settings.send_policy.min_interval, Duration::from_millis(50));
        assert_eq!(settings.send_policy.heartbeat, Duration::from_secs(1));
        assert_eq!(settings.smoothing, DEFAULT_SMOOTHING);
    }

    #[test]
    fn test_no_position_sent_before_join() {
        let (_server, connector) = sphaira_net::memory_network();
        let mut client = Client::new(connector.connect().unwrap(), ClientSettings::default()).unwrap();
        for _ in 0..10 {
            assert!(!client.update(Duration::from_millis(100), Vec3::X));
        }
        assert!(!client.is_joined());
    }
}
