//! Relay configuration with layered sources.
//!
//! Settings are resolved from four layers (lowest to highest priority):
//! 1. **Compiled defaults** - [`ServerConfig::default()`]
//! 2. **Config file** - optional TOML file passed with `--config`
//! 3. **Environment variables** - `BLABD_*` overrides
//! 4. **Command line flags** - applied by the binary
//!
//! ```toml
//! listen = "0.0.0.0:8080"
//! queue_capacity = 1024
//! echo_to_sender = true
//! max_message_size = 65536
//! write_timeout_ms = 10000
//! handshake_timeout_ms = 5000
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use blab_protocol::DEFAULT_PORT;

use crate::router::{RouterConfig, DEFAULT_QUEUE_CAPACITY};

/// Environment variable overriding the listen address
pub const ENV_LISTEN: &str = "BLABD_LISTEN";

/// Environment variable overriding the delivery queue capacity
pub const ENV_QUEUE_CAPACITY: &str = "BLABD_QUEUE_CAPACITY";

/// Environment variable toggling echo to the sender (`true`/`false`)
pub const ENV_ECHO: &str = "BLABD_ECHO";

/// Default maximum size of one inbound message (64 KiB)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

const DEFAULT_WRITE_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 5_000;

/// Relay settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Address the TCP listener binds to.
    pub listen: SocketAddr,

    /// Capacity of the router's delivery queue.
    pub queue_capacity: usize,

    /// Whether a sender receives its own messages back.
    pub echo_to_sender: bool,

    /// Largest inbound message accepted, in bytes.
    pub max_message_size: usize,

    /// Time allowed for one delivery to one peer.
    pub write_timeout_ms: u64,

    /// Time allowed for the WebSocket upgrade after accept.
    pub handshake_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            echo_to_sender: true,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            write_timeout_ms: DEFAULT_WRITE_TIMEOUT_MS,
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
        }
    }
}

impl ServerConfig {
    /// Loads defaults, then the optional file, then process environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Parses a TOML config file. Missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        toml::from_str(&contents).map_err(|e| ConfigError::ParseFile {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Parses TOML text. Missing keys keep their defaults.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(ConfigError::Parse)
    }

    /// Applies `BLABD_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_LISTEN) {
            self.listen = value
                .parse()
                .map_err(|_| ConfigError::invalid(ENV_LISTEN, &value, "host:port"))?;
        }

        if let Some(value) = lookup(ENV_QUEUE_CAPACITY) {
            self.queue_capacity = value
                .parse()
                .map_err(|_| ConfigError::invalid(ENV_QUEUE_CAPACITY, &value, "a positive integer"))?;
        }

        if let Some(value) = lookup(ENV_ECHO) {
            self.echo_to_sender = match value.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => return Err(ConfigError::invalid(ENV_ECHO, &value, "true or false")),
            };
        }

        Ok(())
    }

    /// Rejects settings the relay cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::invalid("queue_capacity", "0", "at least 1"));
        }
        if self.max_message_size == 0 {
            return Err(ConfigError::invalid("max_message_size", "0", "at least 1"));
        }
        if self.write_timeout_ms == 0 {
            return Err(ConfigError::invalid("write_timeout_ms", "0", "at least 1"));
        }
        if self.handshake_timeout_ms == 0 {
            return Err(ConfigError::invalid("handshake_timeout_ms", "0", "at least 1"));
        }
        Ok(())
    }

    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            queue_capacity: self.queue_capacity,
            echo_to_sender: self.echo_to_sender,
        }
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

/// Errors that can occur while resolving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    ParseFile {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),

    #[error("Invalid {field}: {value} (expected {expected})")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },
}

impl ConfigError {
    fn invalid(field: &str, value: &str, expected: &str) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            expected: expected.to_string(),
        }
    }
}
