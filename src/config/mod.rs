//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed client origins for CORS (comma-separated, `*` for any)
    pub client_origin: String,

    /// How long a room may sit with no connections before it is destroyed
    pub room_idle_timeout: Duration,
    /// How often the registry looks for idle rooms
    pub gc_interval: Duration,
    /// Per-connection broadcast buffer (snapshots). A connection that falls
    /// further behind than this is disconnected.
    pub snapshot_buffer: usize,

    /// Simulation tunables handed to every room
    pub game: GameConfig,
}

/// Per-room simulation settings
#[derive(Clone, Debug)]
pub struct GameConfig {
    /// Side length of the square grid
    pub grid_size: u16,
    /// Fixed simulation cadence
    pub tick_interval: Duration,
    /// Glow points placed when a room is created
    pub initial_glow_points: usize,
    /// Turn an eliminated player's trail into glow points
    pub drop_trail_on_death: bool,
    /// Capacity of each room's intent queue
    pub intent_queue_capacity: usize,
    /// Intents accepted per player per tick; the rest are throttled
    pub max_intents_per_tick: usize,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            grid_size: 50,
            tick_interval: Duration::from_millis(100),
            initial_glow_points: 1,
            drop_trail_on_death: true,
            intent_queue_capacity: 256,
            max_intents_per_tick: 4,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Render-style PORT wins, then SERVER_ADDR, then the default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        let defaults = GameConfig::default();

        let game = GameConfig {
            grid_size: parse_or("GRID_SIZE", defaults.grid_size)?,
            tick_interval: Duration::from_millis(parse_or("TICK_INTERVAL_MS", 100u64)?),
            initial_glow_points: parse_or("INITIAL_GLOW_POINTS", defaults.initial_glow_points)?,
            drop_trail_on_death: parse_or("DROP_TRAIL_ON_DEATH", defaults.drop_trail_on_death)?,
            intent_queue_capacity: parse_or(
                "INTENT_QUEUE_CAPACITY",
                defaults.intent_queue_capacity,
            )?,
            max_intents_per_tick: parse_or("MAX_INTENTS_PER_TICK", defaults.max_intents_per_tick)?,
        };

        if game.grid_size == 0 {
            return Err(ConfigError::Invalid("GRID_SIZE"));
        }
        if game.tick_interval.is_zero() {
            return Err(ConfigError::Invalid("TICK_INTERVAL_MS"));
        }
        if game.intent_queue_capacity == 0 {
            return Err(ConfigError::Invalid("INTENT_QUEUE_CAPACITY"));
        }

        let snapshot_buffer: usize = parse_or("SNAPSHOT_BUFFER", 32)?;
        if snapshot_buffer == 0 {
            return Err(ConfigError::Invalid("SNAPSHOT_BUFFER"));
        }

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            client_origin: env::var("CLIENT_ORIGIN").unwrap_or_else(|_| "*".to_string()),

            room_idle_timeout: Duration::from_secs(parse_or("ROOM_IDLE_TIMEOUT_SECS", 300u64)?),
            gc_interval: Duration::from_secs(parse_or("GC_INTERVAL_SECS", 15u64)?.max(1)),
            snapshot_buffer,

            game,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            log_level: "info".to_string(),
            client_origin: "*".to_string(),
            room_idle_timeout: Duration::from_secs(300),
            gc_interval: Duration::from_secs(15),
            snapshot_buffer: 32,
            game: GameConfig::default(),
        }
    }
}

/// Read an optional variable, falling back to `default` when unset
fn parse_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn game_defaults_match_observed_client() {
        let game = GameConfig::default();
        assert_eq!(game.grid_size, 50);
        assert_eq!(game.tick_interval, Duration::from_millis(100));
        assert!(game.max_intents_per_tick > 0);
    }

    #[test]
    fn parse_or_falls_back_when_unset() {
        let value: u64 = parse_or("GLOWRACE_TEST_SURELY_UNSET_VAR", 42).unwrap();
        assert_eq!(value, 42);
    }
}
