//! The client's picture of the other players.

use std::collections::BTreeMap;

use sphaira_multiplayer::{PositionRelay, RemotePlayerView, Roster};

/// Roster and smoothed views of every other session.
#[derive(Debug, Default)]
pub struct RemotePlayers {
    self_id: Option<u16>,
    roster: Vec<u16>,
    views: BTreeMap<u16, RemotePlayerView>,
}

impl RemotePlayers {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the local player's own id and drop any view of it.
    pub fn set_self(&mut self, id: u16) {
        self.self_id = Some(id);
        self.views.remove(&id);
    }

    /// The local player's id, once bootstrapped.
    pub fn self_id(&self) -> Option<u16> {
        self.self_id
    }

    /// Replace the roster: add views for new ids, drop views of ids that
    /// left.
    pub fn apply_roster(&mut self, roster: &Roster) {
        self.roster = roster.ids.clone();
        self.views.retain(|id, _| roster.ids.contains(id));
        for &id in &roster.ids {
            if Some(id) != self.self_id {
                self.views
                    .entry(id)
                    .or_insert_with(|| RemotePlayerView::unplaced(id));
            }
        }
    }

    /// Apply a relayed position, creating the view if the id is unknown.
    /// Relays of the local player's own id are ignored.
    pub fn apply_relay(&mut self, relay: &PositionRelay) {
        if Some(relay.id) == self.self_id {
            tracing::debug!("Ignoring relay of own position");
            return;
        }
        self.views
            .entry(relay.id)
            .or_insert_with(|| RemotePlayerView::unplaced(relay.id))
            .set_target(relay.position);
    }

    /// Advance every view's smoothing by one tick.
    pub fn tick(&mut self, factor: f32) {
        for view in self.views.values_mut() {
            view.tick(factor);
        }
    }

    /// View of `id`.
    pub fn get(&self, id: u16) -> Option<&RemotePlayerView> {
        self.views.get(&id)
    }

    /// All views, by ascending id.
    pub fn iter(&self) -> impl Iterator<Item = &RemotePlayerView> {
        self.views.values()
    }

    /// Latest roster as received.
    pub fn roster(&self) -> &[u16] {
        &self.roster
    }

    /// Number of views.
    pub fn len(&self) -> usize {
        self.views.len()
    }

    /// Whether there are no views.
    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }
}
