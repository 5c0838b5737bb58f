//! Per-connection player sessions.
//!
//! A session is created the first time a connection sends an application
//! message and removed when the transport no longer lists the connection.
//! Session ids are the smallest id not currently in use, so ids freed by a
//! departure are handed out again.

use glam::Vec3;
use rustc_hash::{FxHashMap, FxHashSet};
use sphaira_multiplayer::Roster;
use sphaira_net::ConnectionId;

/// Largest number of concurrent sessions the u16 id space allows.
pub const MAX_SESSIONS: usize = u16::MAX as usize;

/// Server-side record of one connected player.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    /// Session id, unique among live sessions.
    pub id: u16,
    /// Transport connection the session belongs to.
    pub connection: ConnectionId,
    /// Last reported position.
    pub position: Vec3,
}

/// Returned when no further session can be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("session table is full ({0} players)")]
pub struct SessionsFull(pub usize);

/// Live sessions keyed by connection.
#[derive(Debug)]
pub struct SessionTable {
    by_connection: FxHashMap<ConnectionId, Session>,
    max_players: usize,
}

impl SessionTable {
    /// Create an empty table holding at most `max_players` sessions.
    pub fn new(max_players: usize) -> Self {
        Self {
            by_connection: FxHashMap::default(),
            max_players: max_players.min(MAX_SESSIONS),
        }
    }

    /// Session of `connection`.
    pub fn get(&self, connection: ConnectionId) -> Option<&Session> {
        self.by_connection.get(&connection)
    }

    /// Session of `connection`, mutably.
    pub fn get_mut(&mut self, connection: ConnectionId) -> Option<&mut Session> {
        self.by_connection.get_mut(&connection)
    }

    /// Return the session id of `connection`, creating a session if needed.
    /// The flag is `true` when the session was created by this call.
    pub fn get_or_create(&mut self, connection: ConnectionId) -> Result<(u16, bool), SessionsFull> {
        if let Some(session) = self.by_connection.get(&connection) {
            return Ok((session.id, false));
        }
        if self.by_connection.len() >= self.max_players {
            return Err(SessionsFull(self.max_players));
        }
        let id = self.smallest_free_id().ok_or(SessionsFull(self.max_players))?;
        self.by_connection.insert(
            connection,
            Session {
                id,
                connection,
                position: Vec3::ZERO,
            },
        );
        Ok((id, true))
    }

    fn smallest_free_id(&self) -> Option<u16> {
        let used: FxHashSet<u16> = self.by_connection.values().map(|s| s.id).collect();
        (0..=u16::MAX).find(|id| !used.contains(id))
    }

    /// Remove every session whose connection is not in `live`. Returns the
    /// removed sessions.
    pub fn retain_live(&mut self, live: &[ConnectionId]) -> Vec<Session> {
        let gone: Vec<ConnectionId> = self
            .by_connection
            .keys()
            .filter(|connection| !live.contains(*connection))
            .copied()
            .collect();
        gone.into_iter()
            .filter_map(|connection| self.by_connection.remove(&connection))
            .collect()
    }

    /// Ids of all sessions, ascending.
    pub fn roster(&self) -> Roster {
        let mut ids: Vec<u16> = self.by_connection.values().map(|s| s.id).collect();
        ids.sort_unstable();
        Roster { ids }
    }

    /// Connections of all sessions, ordered by session id.
    pub fn connections(&self) -> Vec<ConnectionId> {
        let mut sessions: Vec<&Session> = self.by_connection.values().collect();
        sessions.sort_unstable_by_key(|s| s.id);
        sessions.into_iter().map(|s| s.connection).collect()
    }

    /// Connections of all sessions except `connection`'s own.
    pub fn others(&self, connection: ConnectionId) -> Vec<ConnectionId> {
        self.connections()
            .into_iter()
            .filter(|c| *c != connection)
            .collect()
    }

    /// Iterate over all sessions in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.by_connection.values()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.by_connection.len()
    }

    /// Whether no session is live.
    pub fn is_empty(&self) -> bool {
        self.by_connection.is_empty()
    }

    /// The session cap.
    pub fn max_players(&self) -> usize {
        self.max_players
    }
}
