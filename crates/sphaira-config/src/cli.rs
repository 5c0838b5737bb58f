//! Command-line argument parsing shared by the server and client binaries.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Sphaira command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "sphaira", about = "Sphaira multiplayer world")]
pub struct CliArgs {
    /// Server address (connect target, or bind address for the server).
    #[arg(long)]
    pub server: Option<String>,

    /// Server port.
    #[arg(long)]
    pub port: Option<u16>,

    /// Maximum number of players (server only).
    #[arg(long)]
    pub max_players: Option<u32>,

    /// Sky seed (server only). Empty or 0 picks a random seed.
    #[arg(long)]
    pub seed: Option<String>,

    /// World radius <0.5 - 1024> (server only).
    #[arg(long)]
    pub radius: Option<f32>,

    /// World density <1 - 65536> (server only).
    #[arg(long)]
    pub density: Option<f32>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    ///
    /// Call [`Config::validate`] afterwards; overrides are not range-checked here.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref addr) = args.server {
            self.network.server_address = addr.clone();
        }
        if let Some(port) = args.port {
            self.network.server_port = port;
        }
        if let Some(max) = args.max_players {
            self.network.max_players = max;
        }
        if let Some(ref seed) = args.seed {
            self.world.seed = seed.clone();
        }
        if let Some(radius) = args.radius {
            self.world.radius = radius;
        }
        if let Some(density) = args.density {
            self.world.density = density;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}
