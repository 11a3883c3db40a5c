//! Server configuration.
//!
//! Every type here is a plain value: nothing holds a socket, thread or channel,
//! so a config can be cloned, stored and serialized freely. Live resources are
//! created from it when the server starts.

use crate::http::parse::Limits;
use crate::pool::PoolConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Ceiling on concurrently open connections; the next one gets a 503.
    pub max_connections: usize,
    /// Time allowed for the rest of a request once its request line arrived.
    #[serde(rename = "request_timeout_ms", with = "millis")]
    pub request_timeout: Duration,
    /// Threads of the cooperative scheduler. 1 selects a current-thread runtime.
    pub scheduler_threads: usize,
    pub max_header_bytes: usize,
    pub max_body_bytes: usize,
    pub keep_alive: KeepAliveConfig,
    pub pool: PoolConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let limits = Limits::default();
        Self {
            max_connections: 256,
            request_timeout: Duration::from_secs(30),
            scheduler_threads: 1,
            max_header_bytes: limits.max_header_bytes,
            max_body_bytes: limits.max_body_bytes,
            keep_alive: KeepAliveConfig::default(),
            pool: PoolConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepAliveConfig {
    pub enabled: bool,
    #[serde(rename = "timeout_ms", with = "millis")]
    pub timeout: Duration,
    /// Requests served on one connection before it is closed. 0 means no cap.
    pub max_requests: usize,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout: Duration::from_secs(5),
            max_requests: 100,
        }
    }
}

impl ServerConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: ServerConfig = toml::from_str(source).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();
        if self.max_connections == 0 {
            problems.push("max_connections must be at least 1");
        }
        if self.scheduler_threads == 0 {
            problems.push("scheduler_threads must be at least 1");
        }
        if self.max_header_bytes == 0 {
            problems.push("max_header_bytes must be at least 1");
        }
        if self.pool.queue_capacity == 0 {
            problems.push("pool.queue_capacity must be at least 1");
        }
        if self.pool.timeout.is_zero() {
            problems.push("pool.timeout_ms must be greater than 0");
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems.into_iter().map(String::from).collect()))
        }
    }

    pub(crate) fn limits(&self) -> Limits {
        Limits {
            max_header_bytes: self.max_header_bytes,
            max_body_bytes: self.max_body_bytes,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Invalid(Vec<String>),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Invalid(problems) => write!(f, "Invalid configuration: {}", problems.join(", ")),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Parse(e) => Some(e),
            ConfigError::Invalid(_) => None,
        }
    }
}

/// Durations as whole milliseconds.
pub(crate) mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
