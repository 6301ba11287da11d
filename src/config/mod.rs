//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::util::rate_limit::MESSAGE_RATE_LIMIT;
use crate::ws::keepalive::{MAX_MISSED_PONGS, PING_INTERVAL};
use crate::ws::protocol::GameType;
use crate::ws::reconnect::ReconnectPolicy;

/// Port the desktop client dials by default
pub const DEFAULT_PORT: u16 = 7777;

/// A room opened at startup and kept available
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StandingRoom {
    pub name: String,
    pub game_type: GameType,
}

/// Server configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Ceiling on concurrently open rooms
    pub max_rooms: usize,
    /// Largest `max_players` a room may ask for
    pub max_players_cap: usize,

    /// Keepalive ping period
    pub ping_interval: Duration,
    /// Unanswered pings before a connection is dropped
    pub max_missed_pongs: u32,
    /// How long a seat is held for a player who dropped mid-game
    pub reconnect_grace: Duration,
    /// Bad messages tolerated before a peer is kicked
    pub max_protocol_violations: u32,
    /// Inbound messages per second per connection
    pub message_rate_limit: u32,
    /// Optional shot clock; the turn passes when it runs out
    pub turn_time_limit: Option<Duration>,

    /// Rooms opened at startup
    pub standing_rooms: Vec<StandingRoom>,
    /// Allowed client origin for CORS (browser clients only)
    pub client_origin: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            log_level: "info".to_string(),
            max_rooms: 256,
            max_players_cap: 4,
            ping_interval: PING_INTERVAL,
            max_missed_pongs: MAX_MISSED_PONGS,
            reconnect_grace: Duration::from_secs(30),
            max_protocol_violations: 5,
            message_rate_limit: MESSAGE_RATE_LIMIT,
            turn_time_limit: None,
            standing_rooms: Vec::new(),
            client_origin: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| defaults.server_addr.to_string())
        };

        let turn_time_limit = match env::var("TURN_TIME_LIMIT_SECS") {
            Ok(raw) => {
                let secs: u64 = parse_value("TURN_TIME_LIMIT_SECS", &raw)?;
                (secs > 0).then(|| Duration::from_secs(secs))
            }
            Err(_) => None,
        };

        let standing_rooms = match env::var("STANDING_ROOMS") {
            Ok(raw) => parse_standing_rooms(&raw)?,
            Err(_) => Vec::new(),
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),

            max_rooms: env_or("MAX_ROOMS", defaults.max_rooms)?,
            max_players_cap: env_or("MAX_PLAYERS_CAP", defaults.max_players_cap)?,

            ping_interval: Duration::from_secs(env_or(
                "PING_INTERVAL_SECS",
                defaults.ping_interval.as_secs(),
            )?),
            max_missed_pongs: env_or("MAX_MISSED_PONGS", defaults.max_missed_pongs)?,
            reconnect_grace: Duration::from_secs(env_or(
                "RECONNECT_GRACE_SECS",
                defaults.reconnect_grace.as_secs(),
            )?),
            max_protocol_violations: env_or(
                "MAX_PROTOCOL_VIOLATIONS",
                defaults.max_protocol_violations,
            )?,
            message_rate_limit: env_or("MESSAGE_RATE_LIMIT", defaults.message_rate_limit)?,
            turn_time_limit,

            standing_rooms,
            client_origin: env::var("CLIENT_ORIGIN").ok().filter(|o| !o.is_empty()),
        })
    }
}

/// Client-side connection settings
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub ping_interval: Duration,
    pub max_missed_pongs: u32,
    pub reconnect: ReconnectPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ping_interval: PING_INTERVAL,
            max_missed_pongs: MAX_MISSED_PONGS,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

fn env_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => parse_value(key, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T: FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        value: raw.to_string(),
    })
}

/// `name:game_type` pairs separated by commas, e.g. `Hall:8ball,Club:snooker`
pub fn parse_standing_rooms(raw: &str) -> Result<Vec<StandingRoom>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let invalid = || ConfigError::Invalid {
                key: "STANDING_ROOMS",
                value: entry.to_string(),
            };
            let (name, game_type) = entry.rsplit_once(':').ok_or_else(invalid)?;
            let name = name.trim();
            if name.is_empty() {
                return Err(invalid());
            }
            Ok(StandingRoom {
                name: name.to_string(),
                game_type: game_type.trim().parse().map_err(|_| invalid())?,
            })
        })
        .collect()
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },

    #[error("Invalid server address format")]
    InvalidAddress,
}
