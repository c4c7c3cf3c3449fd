//! Watchmate configuration.
//!
//! Configuration is loaded from environment variables. All sensitive
//! fields are redacted in Debug output.

use secrecy::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP/WebSocket bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:3001";

/// Default maximum number of live rooms.
pub const DEFAULT_MAX_ROOMS: usize = 10_000;

/// Default spacing between countdown ticks in milliseconds.
pub const DEFAULT_COUNTDOWN_TICK_MS: u64 = 1000;

/// Default bcrypt cost for room passwords.
pub const DEFAULT_BCRYPT_COST: u32 = 10;

/// bcrypt accepts costs in this range.
pub const MIN_BCRYPT_COST: u32 = 4;
pub const MAX_BCRYPT_COST: u32 = 31;

/// Default instance ID prefix.
pub const DEFAULT_INSTANCE_ID_PREFIX: &str = "wm";

/// Watchmate configuration.
///
/// Loaded from environment variables with sensible defaults.
#[derive(Clone)]
pub struct Config {
    /// HTTP + WebSocket bind address (default: "0.0.0.0:3001").
    pub bind_address: String,

    /// Unique identifier for this instance (used in logs).
    pub instance_id: String,

    /// Maximum number of concurrently live rooms.
    pub max_rooms: usize,

    /// Spacing between countdown ticks.
    pub countdown_tick: Duration,

    /// bcrypt cost factor for room passwords.
    pub bcrypt_cost: u32,

    /// Master secret for host token HMAC (base64-encoded).
    /// When unset, a random secret is generated at startup, which
    /// invalidates outstanding host tokens on restart (rooms do not survive
    /// a restart either).
    pub host_token_secret: Option<SecretString>,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("instance_id", &self.instance_id)
            .field("max_rooms", &self.max_rooms)
            .field("countdown_tick", &self.countdown_tick)
            .field("bcrypt_cost", &self.bcrypt_cost)
            .field(
                "host_token_secret",
                &self.host_token_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("WM_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let max_rooms = parse_var(vars, "WM_MAX_ROOMS", DEFAULT_MAX_ROOMS)?;
        if max_rooms == 0 {
            return Err(ConfigError::InvalidValue(
                "WM_MAX_ROOMS must be greater than zero".to_string(),
            ));
        }

        let countdown_tick_ms = parse_var(vars, "WM_COUNTDOWN_TICK_MS", DEFAULT_COUNTDOWN_TICK_MS)?;
        if countdown_tick_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "WM_COUNTDOWN_TICK_MS must be greater than zero".to_string(),
            ));
        }

        let bcrypt_cost = parse_var(vars, "WM_BCRYPT_COST", DEFAULT_BCRYPT_COST)?;
        if !(MIN_BCRYPT_COST..=MAX_BCRYPT_COST).contains(&bcrypt_cost) {
            return Err(ConfigError::InvalidValue(format!(
                "WM_BCRYPT_COST must be between {MIN_BCRYPT_COST} and {MAX_BCRYPT_COST}, got {bcrypt_cost}"
            )));
        }

        let host_token_secret = vars
            .get("WM_HOST_TOKEN_SECRET")
            .filter(|s| !s.is_empty())
            .map(|s| SecretString::from(s.clone()));

        let instance_id = vars.get("WM_INSTANCE_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_INSTANCE_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            bind_address,
            instance_id,
            max_rooms,
            countdown_tick: Duration::from_millis(countdown_tick_ms),
            bcrypt_cost,
            host_token_secret,
        })
    }
}

fn parse_var<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(name) {
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{name} has invalid value '{raw}'"))),
        None => Ok(default),
    }
}
