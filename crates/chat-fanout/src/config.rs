//! Fanout service configuration.
//!
//! Configuration is loaded from environment variables. The Redis URL is
//! redacted in Debug output.

use crate::actors::{ConnectionSettings, HubSettings, RoomRetention};

use secrecy::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default WebSocket bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8083";

/// Default health and metrics bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8084";

/// Default outbound mailbox capacity per connection.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 256;

/// Default time allowed for one transport write.
pub const DEFAULT_WRITE_WAIT_SECONDS: u64 = 10;

/// Default time allowed between pongs.
pub const DEFAULT_PONG_WAIT_SECONDS: u64 = 60;

/// Default ping interval (9/10 of the pong wait).
pub const DEFAULT_PING_PERIOD_SECONDS: u64 = 54;

/// Default maximum inbound frame size in bytes.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 10_000;

/// Default instance ID prefix.
pub const DEFAULT_INSTANCE_ID_PREFIX: &str = "fanout";

/// Fanout service configuration.
#[derive(Clone)]
pub struct Config {
    /// Redis URL for the bus and stores. `None` runs a single instance on
    /// the in-process bus and store.
    pub redis_url: Option<SecretString>,

    /// WebSocket listener (default: "0.0.0.0:8083").
    pub bind_address: String,

    /// `/health`, `/ready` and `/metrics` listener (default: "0.0.0.0:8084").
    pub health_bind_address: String,

    /// Unique identifier for this instance.
    pub instance_id: String,

    pub mailbox_capacity: usize,
    pub write_wait_seconds: u64,
    pub pong_wait_seconds: u64,
    pub ping_period_seconds: u64,
    pub max_message_size: usize,

    /// Evict rooms empty for this long. `None` keeps them indefinitely.
    pub room_idle_eviction_seconds: Option<u64>,
}

/// Custom Debug implementation that redacts the Redis URL.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field(
                "redis_url",
                &self.redis_url.as_ref().map(|_| "[REDACTED]"),
            )
            .field("bind_address", &self.bind_address)
            .field("health_bind_address", &self.health_bind_address)
            .field("instance_id", &self.instance_id)
            .field("mailbox_capacity", &self.mailbox_capacity)
            .field("write_wait_seconds", &self.write_wait_seconds)
            .field("pong_wait_seconds", &self.pong_wait_seconds)
            .field("ping_period_seconds", &self.ping_period_seconds)
            .field("max_message_size", &self.max_message_size)
            .field("room_idle_eviction_seconds", &self.room_idle_eviction_seconds)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
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
        let redis_url = vars
            .get("REDIS_URL")
            .filter(|url| !url.is_empty())
            .map(|url| SecretString::from(url.clone()));

        let bind_address = vars
            .get("FANOUT_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let health_bind_address = vars
            .get("FANOUT_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let mailbox_capacity =
            parse_var(vars, "FANOUT_MAILBOX_CAPACITY", DEFAULT_MAILBOX_CAPACITY)?;
        if mailbox_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "FANOUT_MAILBOX_CAPACITY must be greater than 0".to_string(),
            ));
        }

        let write_wait_seconds =
            parse_var(vars, "FANOUT_WRITE_WAIT_SECONDS", DEFAULT_WRITE_WAIT_SECONDS)?;
        let pong_wait_seconds =
            parse_var(vars, "FANOUT_PONG_WAIT_SECONDS", DEFAULT_PONG_WAIT_SECONDS)?;
        let ping_period_seconds =
            parse_var(vars, "FANOUT_PING_PERIOD_SECONDS", DEFAULT_PING_PERIOD_SECONDS)?;

        if ping_period_seconds == 0 || ping_period_seconds >= pong_wait_seconds {
            return Err(ConfigError::InvalidValue(format!(
                "FANOUT_PING_PERIOD_SECONDS ({ping_period_seconds}) must be positive and \
                 less than FANOUT_PONG_WAIT_SECONDS ({pong_wait_seconds})"
            )));
        }

        let max_message_size =
            parse_var(vars, "FANOUT_MAX_MESSAGE_SIZE", DEFAULT_MAX_MESSAGE_SIZE)?;

        let room_idle_eviction_seconds =
            match parse_var(vars, "FANOUT_ROOM_IDLE_EVICTION_SECONDS", 0u64)? {
                0 => None,
                seconds => Some(seconds),
            };

        let instance_id = vars.get("FANOUT_INSTANCE_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_INSTANCE_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            redis_url,
            bind_address,
            health_bind_address,
            instance_id,
            mailbox_capacity,
            write_wait_seconds,
            pong_wait_seconds,
            ping_period_seconds,
            max_message_size,
            room_idle_eviction_seconds,
        })
    }

    #[must_use]
    pub fn room_retention(&self) -> RoomRetention {
        match self.room_idle_eviction_seconds {
            Some(seconds) => RoomRetention::EvictWhenIdle(Duration::from_secs(seconds)),
            None => RoomRetention::Indefinite,
        }
    }

    #[must_use]
    pub fn hub_settings(&self) -> HubSettings {
        HubSettings::new(self.instance_id.clone()).with_room_retention(self.room_retention())
    }

    #[must_use]
    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            mailbox_capacity: self.mailbox_capacity,
            write_wait: Duration::from_secs(self.write_wait_seconds),
            pong_wait: Duration::from_secs(self.pong_wait_seconds),
            ping_period: Duration::from_secs(self.ping_period_seconds),
            max_message_size: self.max_message_size,
        }
    }
}

/// Parse an optional variable, falling back to `default` when unset.
fn parse_var<T: FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{key}={raw:?} is not a valid number"))),
    }
}
