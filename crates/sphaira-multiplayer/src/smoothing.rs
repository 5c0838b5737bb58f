//! Client-side views of other players.
//!
//! Each view chases the last position the server relayed with exponential
//! smoothing: every local tick the rendered position closes `factor` of the
//! remaining distance. It approaches the target but never overshoots it.

use glam::Vec3;

/// Default fraction of the remaining distance closed per tick.
pub const DEFAULT_SMOOTHING: f32 = 0.25;

/// Local rendering state of one other session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RemotePlayerView {
    id: u16,
    target: Vec3,
    rendered: Vec3,
    placed: bool,
}

impl RemotePlayerView {
    /// A view at a known position.
    pub fn new(id: u16, position: Vec3) -> Self {
        Self {
            id,
            target: position,
            rendered: position,
            placed: true,
        }
    }

    /// A view whose position is not known yet. Its first target is taken
    /// as-is instead of being approached from the origin.
    pub fn unplaced(id: u16) -> Self {
        Self {
            id,
            target: Vec3::ZERO,
            rendered: Vec3::ZERO,
            placed: false,
        }
    }

    /// Session id.
    pub fn id(&self) -> u16 {
        self.id
    }

    /// Last relayed position.
    pub fn target(&self) -> Vec3 {
        self.target
    }

    /// Smoothed position.
    pub fn rendered(&self) -> Vec3 {
        self.rendered
    }

    /// Whether any position has been received.
    pub fn is_placed(&self) -> bool {
        self.placed
    }

    /// Record a newly relayed position.
    pub fn set_target(&mut self, target: Vec3) {
        self.target = target;
        if !self.placed {
            self.rendered = target;
            self.placed = true;
        }
    }

    /// Move the rendered position `factor` of the way to the target.
    pub fn tick(&mut self, factor: f32) {
        self.rendered += (self.target - self.rendered) * factor;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smoothing_steps() {
        let mut view = RemotePlayerView::new(1, Vec3::ZERO);
        view.set_target(Vec3::new(100.0, 0.0, 0.0));

        view.tick(DEFAULT_SMOOTHING);
        assert_eq!(view.rendered().x, 25.0);

        view.tick(DEFAULT_SMOOTHING);
        assert_eq!(view.rendered().x, 43.75);
        assert_eq!(view.target().x - view.rendered().x, 56.25);
    }

    #[test]
    fn test_smoothing_converges_without_reaching() {
        let mut view = RemotePlayerView::new(1, Vec3::ZERO);
        view.set_target(Vec3::new(100.0, -40.0, 8.0));

        let mut previous = (view.target() - view.rendered()).length();
        for _ in 0..30 {
            view.tick(DEFAULT_SMOOTHING);
            let remaining = (view.target() - view.rendered()).length();
            assert!(remaining < previous, "distance must shrink every tick");
            previous = remaining;
        }
        assert!(previous < 0.05);
        assert!(view.rendered().x < 100.0, "never overshoots");
    }

    #[test]
    fn test_unplaced_view_snaps_to_first_target() {
        let mut view = RemotePlayerView::unplaced(2);
        assert!(!view.is_placed());

        view.set_target(Vec3::new(5.0, 5.0, 5.0));
        assert!(view.is_placed());
        assert_eq!(view.rendered(), Vec3::new(5.0, 5.0, 5.0));

        view.set_target(Vec3::new(9.0, 5.0, 5.0));
        assert_eq!(view.rendered().x, 5.0, "later targets are approached");
        view.tick(0.5);
        assert_eq!(view.rendered().x, 7.0);
    }
}
