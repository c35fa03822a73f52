//! Configuration module - environment variable parsing

use std::env;
use std::time::Duration;

/// Engine configuration loaded from environment variables
///
/// Every knob has a default, so `from_env` only fails on malformed values.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Interval between presence heartbeat refreshes
    pub heartbeat_interval: Duration,
    /// Heartbeat age beyond which a presence entry counts as stale
    pub liveness_threshold: Duration,
    /// How long a departed opponent stays gone before the match is forfeited
    pub forfeit_grace: Duration,
    /// Seats in a match (two-player duel)
    pub max_players: usize,

    /// Base URL of the remote store REST endpoint (unset = local/in-memory)
    pub store_url: Option<String>,
    /// Auth token appended to remote store requests
    pub store_auth: Option<String>,
    /// Poll cadence for the remote store change watcher
    pub store_poll_interval: Duration,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Board geometry shared by both clients
    pub grid: GridConfig,
}

impl EngineConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            heartbeat_interval: env_millis("HEARTBEAT_INTERVAL_MS", 5_000)?,
            liveness_threshold: env_millis("LIVENESS_THRESHOLD_MS", 10_000)?,
            forfeit_grace: env_millis("FORFEIT_GRACE_MS", 30_000)?,
            max_players: env_parse("MAX_PLAYERS", 2)?,

            store_url: env::var("STORE_URL").ok(),
            store_auth: env::var("STORE_AUTH_TOKEN").ok(),
            store_poll_interval: env_millis("STORE_POLL_INTERVAL_MS", 250)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            grid: GridConfig::default(),
        })
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(5_000),
            liveness_threshold: Duration::from_millis(10_000),
            forfeit_grace: Duration::from_millis(30_000),
            max_players: 2,
            store_url: None,
            store_auth: None,
            store_poll_interval: Duration::from_millis(250),
            log_level: "info".to_string(),
            grid: GridConfig::default(),
        }
    }
}

/// Board geometry: an N x N grid over a fixed physical extent, rendered by
/// each client at two different x offsets (own board and enemy board).
#[derive(Clone, Copy, Debug)]
pub struct GridConfig {
    /// Physical side length of a board
    pub extent: f32,
    /// Cells per side
    pub divisions: u32,
    /// X offset at which a client renders its own board
    pub own_offset_x: f32,
    /// X offset at which a client renders the enemy board
    pub enemy_offset_x: f32,
}

impl GridConfig {
    /// Physical side length of a single cell
    pub fn cell_size(&self) -> f32 {
        self.extent / self.divisions as f32
    }
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            extent: 400.0,
            divisions: 8,
            own_offset_x: 150.0,
            enemy_offset_x: -330.0,
        }
    }
}

fn env_millis(name: &'static str, default: u64) -> Result<Duration, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Duration::from_millis)
            .map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(Duration::from_millis(default)),
    }
}

fn env_parse<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_timings() {
        let config = EngineConfig::default();
        assert_eq!(config.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(config.liveness_threshold, Duration::from_secs(10));
        assert_eq!(config.max_players, 2);
    }

    #[test]
    fn grid_cell_size() {
        assert_eq!(GridConfig::default().cell_size(), 50.0);
    }
}
