//! Application configuration loaded from environment.

use std::net::SocketAddr;
use std::time::Duration;

use crate::services::hub::HubSettings;
use crate::services::session::PumpSettings;

/// Application configuration loaded from `.env` and environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address (e.g. `0.0.0.0:8080`).
    pub server_addr: SocketAddr,
    /// PostgreSQL connection URL. When unset the server keeps everything in memory.
    pub database_url: Option<String>,
    /// JWT signing secret (min 32 chars).
    pub jwt_secret: String,
    /// Session token lifetime in seconds.
    pub token_ttl_secs: i64,
    /// Origin allowed by CORS; any origin when unset.
    pub allowed_origin: Option<String>,
    /// Log level: `error`, `warn`, `info`, `debug`, `trace`.
    pub log_level: String,
    /// Capacity of each session's outbound queue.
    pub outbound_queue: usize,
    /// Largest inbound WebSocket message, in bytes.
    pub max_message_bytes: usize,
    /// Idle-read deadline; pings are sent at 9/10 of it.
    pub pong_wait: Duration,
    /// Upper bound on a single transport write.
    pub write_wait: Duration,
    /// Seats per lobby room; `None` disables lobby pairing.
    pub lobby_capacity: Option<usize>,
}

impl Config {
    /// Load configuration from environment. Call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        let server_addr = std::env::var("SERVER_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8080".to_string());
        let server_addr: SocketAddr = server_addr
            .parse()
            .map_err(|_| ConfigLoadError::InvalidServerAddr)?;

        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|url| !url.trim().is_empty());
        let jwt_secret = std::env::var("JWT_SECRET")
            .unwrap_or_else(|_| "parley_jwt_secret_change_in_production_32chars".to_string());
        let token_ttl_secs = parse_var("TOKEN_TTL_SECS", 600)?;
        let allowed_origin = std::env::var("ALLOWED_ORIGIN")
            .ok()
            .filter(|origin| !origin.trim().is_empty());
        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let outbound_queue: usize = parse_var("OUTBOUND_QUEUE", 256)?;
        if outbound_queue == 0 {
            return Err(ConfigLoadError::Invalid("OUTBOUND_QUEUE"));
        }
        let max_message_bytes = parse_var("MAX_MESSAGE_BYTES", 512)?;
        let pong_wait_secs: u64 = parse_var("PONG_WAIT_SECS", 60)?;
        if pong_wait_secs < 2 {
            return Err(ConfigLoadError::Invalid("PONG_WAIT_SECS"));
        }
        let write_wait_secs: u64 = parse_var("WRITE_WAIT_SECS", 10)?;
        let lobby_capacity: usize = parse_var("LOBBY_CAPACITY", 0)?;

        Ok(Self {
            server_addr,
            database_url,
            jwt_secret,
            token_ttl_secs,
            allowed_origin,
            log_level,
            outbound_queue,
            max_message_bytes,
            pong_wait: Duration::from_secs(pong_wait_secs),
            write_wait: Duration::from_secs(write_wait_secs),
            lobby_capacity: (lobby_capacity > 0).then_some(lobby_capacity),
        })
    }

    pub fn pump_settings(&self) -> PumpSettings {
        PumpSettings {
            outbound_queue: self.outbound_queue,
            max_message_bytes: self.max_message_bytes,
            pong_wait: self.pong_wait,
            ping_period: self.pong_wait * 9 / 10,
            write_wait: self.write_wait,
        }
    }

    pub fn hub_settings(&self) -> HubSettings {
        HubSettings {
            lobby_capacity: self.lobby_capacity,
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigLoadError> {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigLoadError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("Invalid SERVER_ADDR")]
    InvalidServerAddr,
    #[error("Invalid value for {0}")]
    Invalid(&'static str),
}
