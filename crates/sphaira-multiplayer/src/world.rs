//! Shared world parameters and the server-aligned clock.

use std::time::{Duration, Instant};

use crate::messages::WorldInfo;

/// Parameters fixed for the lifetime of a joined world.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldParameters {
    /// Sky seed.
    pub seed: i32,
    /// World sphere radius.
    pub radius: f32,
    /// World density.
    pub density: f32,
    /// Server elapsed seconds at bootstrap.
    pub epoch: f64,
    /// Session id the server assigned to this client.
    pub assigned_id: u16,
}

impl From<WorldInfo> for WorldParameters {
    fn from(info: WorldInfo) -> Self {
        Self {
            seed: info.seed,
            radius: info.radius,
            density: info.density,
            epoch: info.server_elapsed,
            assigned_id: info.assigned_id,
        }
    }
}

/// Estimate of the server's elapsed time, anchored at bootstrap receipt.
///
/// Transit delay of the bootstrap reply is not compensated.
#[derive(Debug, Clone, Copy)]
pub struct WorldClock {
    epoch: f64,
    received_at: Instant,
}

impl WorldClock {
    /// Anchor `epoch` (server seconds) at `received_at`.
    pub fn new(epoch: f64, received_at: Instant) -> Self {
        Self { epoch, received_at }
    }

    /// Server elapsed seconds at `now`.
    pub fn elapsed_at(&self, now: Instant) -> f64 {
        self.epoch + now.saturating_duration_since(self.received_at).as_secs_f64()
    }

    /// Server elapsed seconds now.
    pub fn elapsed_seconds(&self) -> f64 {
        self.elapsed_at(Instant::now())
    }

    /// Local time since the anchor.
    pub fn since_receipt(&self) -> Duration {
        self.received_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameters_from_world_info() {
        let params = WorldParameters::from(WorldInfo {
            seed: 42,
            radius: 8.0,
            density: 64.0,
            server_elapsed: 10.0,
            assigned_id: 1,
        });
        assert_eq!(params.seed, 42);
        assert_eq!(params.epoch, 10.0);
        assert_eq!(params.assigned_id, 1);
    }

    #[test]
    fn test_clock_advances_from_epoch() {
        let start = Instant::now();
        let clock = WorldClock::new(100.0, start);
        assert_eq!(clock.elapsed_at(start), 100.0);
        let later = clock.elapsed_at(start + Duration::from_millis(1500));
        assert!((later - 101.5).abs() < 1e-9);
    }

    #[test]
    fn test_clock_never_runs_backwards() {
        let start = Instant::now() + Duration::from_secs(1);
        let clock = WorldClock::new(5.0, start);
        assert_eq!(clock.elapsed_at(Instant::now()), 5.0);
    }
}
