//! The server's world: parameters handed out at bootstrap and the clock
//! that stamps every bootstrap reply.

use std::time::Instant;

use sphaira_config::WorldConfig;
use sphaira_multiplayer::WorldInfo;

/// World state owned by the server loop.
#[derive(Debug, Clone)]
pub struct ServerWorld {
    seed: i32,
    radius: f32,
    density: f32,
    started: Instant,
}

impl ServerWorld {
    /// A world with explicit parameters, started now.
    pub fn new(seed: i32, radius: f32, density: f32) -> Self {
        Self {
            seed,
            radius,
            density,
            started: Instant::now(),
        }
    }

    /// A world built from config, resolving the seed text.
    pub fn from_config(config: &WorldConfig) -> Self {
        Self::new(config.resolve_seed(), config.radius, config.density)
    }

    /// Sky seed.
    pub fn seed(&self) -> i32 {
        self.seed
    }

    /// World radius.
    pub fn radius(&self) -> f32 {
        self.radius
    }

    /// World density.
    pub fn density(&self) -> f32 {
        self.density
    }

    /// Seconds since the world started.
    pub fn elapsed_seconds(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// Bootstrap reply for session `assigned_id`.
    pub fn bootstrap(&self, assigned_id: u16) -> WorldInfo {
        WorldInfo {
            seed: self.seed,
            radius: self.radius,
            density: self.density,
            server_elapsed: self.elapsed_seconds(),
            assigned_id,
        }
    }
}
