//! Adapter configuration.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{AdapterError, AdapterResult};

/// Configuration for a [`crate::adapter::RedisAdapter`].
///
/// Every field has a default, so `AdapterConfig::default()` yields a working
/// configuration for a local Redis. The struct also deserializes from any
/// serde source (a config file section, an env layer) with the same
/// per-field defaults applied.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AdapterConfig {
    /// Redis host.
    #[serde(default = "default_host")]
    pub host: String,

    /// Redis port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Channel prefix. The first `#`-delimited segment of every channel
    /// this adapter touches.
    #[serde(default = "default_key")]
    pub key: String,

    /// Base clients-query timeout in milliseconds. The effective deadline
    /// of a fleet query is this value multiplied by the number of expected
    /// peer responses.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl AdapterConfig {
    /// Parse the `"host:port"` shorthand, leaving every other field at its
    /// default.
    pub fn from_addr(addr: &str) -> AdapterResult<Self> {
        let (host, port) = addr
            .rsplit_once(':')
            .ok_or_else(|| AdapterError::config(format!("expected host:port, got {addr:?}")))?;
        let port: u16 = port
            .parse()
            .map_err(|_| AdapterError::config(format!("invalid port in {addr:?}")))?;
        if host.is_empty() {
            return Err(AdapterError::config(format!("empty host in {addr:?}")));
        }
        Ok(Self {
            host: host.to_string(),
            port,
            ..Self::default()
        })
    }

    /// Base clients-query timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Connection URL for the default Redis clients.
    pub fn redis_url(&self) -> String {
        format!("redis://{}:{}", self.host, self.port)
    }

    /// Validate the configuration.
    ///
    /// The prefix must be non-empty and must not contain `#`, which is the
    /// channel segment delimiter.
    pub fn validate(&self) -> AdapterResult<()> {
        if self.host.is_empty() {
            return Err(AdapterError::config("host must not be empty"));
        }
        if self.key.is_empty() {
            return Err(AdapterError::config("key must not be empty"));
        }
        if self.key.contains('#') {
            return Err(AdapterError::config("key must not contain '#'"));
        }
        if self.timeout_ms == 0 {
            return Err(AdapterError::config("timeout_ms must be positive"));
        }
        Ok(())
    }
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            key: default_key(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    6379
}

fn default_key() -> String {
    "socket.io".to_string()
}

fn default_timeout_ms() -> u64 {
    50
}
