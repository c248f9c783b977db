//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::game::{DEFAULT_MAX_SCORE, MAX_SCORE_LIMIT};
use crate::util::time::DEFAULT_TICK_RATE;

pub const MAX_TICK_RATE: u32 = 240;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// HS256 secret used to verify identity tokens
    pub jwt_secret: String,

    /// Result persistence endpoint; results are only logged when unset
    pub results_url: Option<String>,
    pub results_api_key: Option<String>,

    /// Allowed client origins for CORS, `*` for any
    pub client_origin: String,

    /// Simulation and broadcast rate in Hz
    pub tick_rate: u32,
    /// Score limit for matchmaking games
    pub default_max_score: u32,

    pub pairing_interval: Duration,
    /// How long finished rooms and tournaments are kept
    pub retention: Duration,
    pub sweep_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // PaaS hosts provide PORT, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        let tick_rate = parse_or("TICK_RATE", DEFAULT_TICK_RATE)?;
        if !(1..=MAX_TICK_RATE).contains(&tick_rate) {
            return Err(ConfigError::OutOfRange("TICK_RATE"));
        }
        let default_max_score = parse_or("DEFAULT_MAX_SCORE", DEFAULT_MAX_SCORE)?;
        if !(1..=MAX_SCORE_LIMIT).contains(&default_max_score) {
            return Err(ConfigError::OutOfRange("DEFAULT_MAX_SCORE"));
        }

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            jwt_secret: env::var("AUTH_JWT_SECRET")
                .map_err(|_| ConfigError::Missing("AUTH_JWT_SECRET"))?,

            results_url: optional("RESULTS_URL"),
            results_api_key: optional("RESULTS_API_KEY"),

            client_origin: env::var("CLIENT_ORIGIN").unwrap_or_else(|_| "*".to_string()),

            tick_rate,
            default_max_score,

            pairing_interval: Duration::from_secs(parse_or("PAIRING_INTERVAL_SECS", 5u64)?.max(1)),
            retention: Duration::from_secs(parse_or("ROOM_RETENTION_SECS", 3600u64)?),
            sweep_interval: Duration::from_secs(parse_or("SWEEP_INTERVAL_SECS", 60u64)?.max(1)),
        })
    }

    /// Configured CORS origins, `None` meaning any origin
    pub fn allowed_origins(&self) -> Option<Vec<String>> {
        if self.client_origin.trim() == "*" {
            return None;
        }
        Some(
            self.client_origin
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect(),
        )
    }
}

fn optional(key: &'static str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Value out of range for environment variable: {0}")]
    OutOfRange(&'static str),
}
