//! Configuration structs with sensible defaults and RON persistence.

use std::hash::Hasher;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::Rng;
use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Permitted world radius, inclusive.
pub const WORLD_RADIUS_RANGE: (f32, f32) = (0.5, 1024.0);

/// Permitted world density, inclusive.
pub const WORLD_DENSITY_RANGE: (f32, f32) = (1.0, 65536.0);

/// Longest accepted sync interval, in seconds.
pub const MAX_SYNC_INTERVAL_SECONDS: f32 = 3600.0;

/// Top-level configuration shared by the server and client binaries.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Transport and connection settings.
    pub network: NetworkConfig,
    /// Client join (negotiation + bootstrap) retry settings.
    pub join: JoinConfig,
    /// World parameters handed to clients at bootstrap (server only).
    pub world: WorldConfig,
    /// Position synchronization tuning.
    pub sync: SyncConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the client connects to, or the server binds to.
    pub server_address: String,
    /// Port the client connects to, or the server listens on.
    pub server_port: u16,
    /// Maximum number of concurrently connected players (server only).
    pub max_players: u32,
    /// Idle sleep between polls when nothing was received, in milliseconds.
    pub poll_interval_ms: u64,
    /// A peer that sends nothing for this long is considered gone.
    pub connection_timeout_seconds: u64,
    /// Interval between keepalive frames on an idle connection.
    pub keepalive_interval_seconds: u64,
}

/// Bounded retry settings for the client's join sequence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct JoinConfig {
    /// How long a single negotiation or bootstrap attempt waits for its reply.
    pub attempt_timeout_ms: u64,
    /// How many attempts are made before giving up.
    pub max_attempts: u32,
}

/// World parameters (server only).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorldConfig {
    /// Sky seed. Empty or `0` picks a random seed, an integer is used as-is,
    /// any other text is hashed.
    pub seed: String,
    /// World radius.
    pub radius: f32,
    /// World density.
    pub density: f32,
}

/// Position synchronization settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    /// Minimum time between two position sends while moving, in seconds.
    pub min_send_interval_seconds: f32,
    /// Maximum time between two position sends, even when stationary.
    pub heartbeat_interval_seconds: f32,
    /// Displacement that counts as movement worth sending.
    pub movement_threshold: f32,
    /// Fraction of the remaining distance a remote player covers per tick.
    pub smoothing_factor: f32,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
    /// Also write JSON logs to the log directory.
    pub log_to_file: bool,
}

// --- Default implementations ---

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            server_address: "127.0.0.1".to_string(),
            server_port: 14242,
            max_players: 128,
            poll_interval_ms: 16,
            connection_timeout_seconds: 15,
            keepalive_interval_seconds: 5,
        }
    }
}

impl Default for JoinConfig {
    fn default() -> Self {
        Self {
            attempt_timeout_ms: 2_000,
            max_attempts: 5,
        }
    }
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            seed: String::new(),
            radius: 8.0,
            density: 1024.0,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            min_send_interval_seconds: 0.05,
            heartbeat_interval_seconds: 1.0,
            movement_threshold: 0.1,
            smoothing_factor: 0.25,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_to_file: false,
        }
    }
}

// --- Typed accessors ---

impl NetworkConfig {
    /// Idle sleep between polls.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Silence after which a peer is dropped.
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_seconds)
    }

    /// Keepalive frame interval.
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_seconds)
    }
}

impl JoinConfig {
    /// Per-attempt reply timeout.
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }
}

impl SyncConfig {
    /// Lower bound between sends while moving.
    pub fn min_send_interval(&self) -> Duration {
        Duration::from_secs_f32(self.min_send_interval_seconds)
    }

    /// Upper bound between sends.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs_f32(self.heartbeat_interval_seconds)
    }
}

impl WorldConfig {
    /// Turn the configured seed text into the sky seed.
    ///
    /// Never returns `0`: an empty or zero seed is replaced by a random one.
    pub fn resolve_seed(&self) -> i32 {
        let text = self.seed.trim();
        let seed = if text.is_empty() {
            0
        } else if let Ok(value) = text.parse::<i32>() {
            value
        } else {
            hash_seed(text)
        };

        if seed == 0 {
            rand::rng().random_range(1..i32::MAX)
        } else {
            seed
        }
    }
}

/// Stable hash of a textual seed, so the same text gives the same sky on
/// every run.
fn hash_seed(text: &str) -> i32 {
    let mut hasher = FxHasher::default();
    hasher.write(text.as_bytes());
    hasher.finish() as i32
}

/// Default directory holding `config.ron`.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("sphaira"))
        .unwrap_or_else(|| PathBuf::from("."))
}

// --- Validation ---

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

impl Config {
    /// Check every setting against its permitted range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let (min_radius, max_radius) = WORLD_RADIUS_RANGE;
        if !(min_radius..=max_radius).contains(&self.world.radius) {
            return Err(invalid(
                "world.radius",
                format!("{} is outside {min_radius}..={max_radius}", self.world.radius),
            ));
        }

        let (min_density, max_density) = WORLD_DENSITY_RANGE;
        if !(min_density..=max_density).contains(&self.world.density) {
            return Err(invalid(
                "world.density",
                format!(
                    "{} is outside {min_density}..={max_density}",
                    self.world.density
                ),
            ));
        }

        if self.network.max_players == 0 || self.network.max_players > u32::from(u16::MAX) {
            return Err(invalid(
                "network.max_players",
                format!("must be within 1..={}", u16::MAX),
            ));
        }
        if self.network.poll_interval_ms == 0 {
            return Err(invalid("network.poll_interval_ms", "must be positive"));
        }
        if self.network.keepalive_interval_seconds == 0
            || self.network.keepalive_interval_seconds >= self.network.connection_timeout_seconds
        {
            return Err(invalid(
                "network.keepalive_interval_seconds",
                "must be positive and shorter than the connection timeout",
            ));
        }

        if self.join.max_attempts == 0 {
            return Err(invalid("join.max_attempts", "at least one attempt is required"));
        }
        if self.join.attempt_timeout_ms == 0 {
            return Err(invalid("join.attempt_timeout_ms", "must be positive"));
        }

        let sync = &self.sync;
        if !(sync.min_send_interval_seconds > 0.0) {
            return Err(invalid("sync.min_send_interval_seconds", "must be positive"));
        }
        if !(sync.heartbeat_interval_seconds >= sync.min_send_interval_seconds) {
            return Err(invalid(
                "sync.heartbeat_interval_seconds",
                "must not be shorter than the minimum send interval",
            ));
        }
        if !(sync.heartbeat_interval_seconds <= MAX_SYNC_INTERVAL_SECONDS) {
            return Err(invalid(
                "sync.heartbeat_interval_seconds",
                format!("must not exceed {MAX_SYNC_INTERVAL_SECONDS} seconds"),
            ));
        }
        if !(sync.movement_threshold >= 0.0 && sync.movement_threshold.is_finite()) {
            return Err(invalid("sync.movement_threshold", "must not be negative"));
        }
        if !(sync.smoothing_factor > 0.0 && sync.smoothing_factor <= 1.0) {
            return Err(invalid("sync.smoothing_factor", "must be within (0, 1]"));
        }

        Ok(())
    }
}

// --- Load / Save / Reload ---

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join("config.ron");

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
            let config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
            config.validate()?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let config_path = config_dir.join("config.ron");
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);

        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(&config_path, serialized).map_err(ConfigError::WriteError)?;
        Ok(())
    }

    /// Hot-reload: returns `Some(new_config)` if the file changed, `None` otherwise.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let config_path = config_dir.join("config.ron");
        let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
        let new_config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
        new_config.validate()?;

        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }
}
