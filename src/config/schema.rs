use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::wire::Endian;

/// Floor for the provider worker pool.
pub const MIN_WORKERS: usize = 2;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {reason}")]
    Read { path: String, reason: String },
    #[error("failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },
    #[error("line {line}: expected key=value, got {got:?}")]
    Malformed { line: usize, got: String },
    #[error("missing required key: {0}")]
    MissingKey(&'static str),
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Immutable process configuration.
///
/// Constructed once at startup (from a conf file, a TOML file, or directly)
/// and passed by construction to the components that need it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub provider: ProviderSettings,
    pub store: StoreSettings,
    pub wire: WireSettings,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// Address the provider binds and advertises.
    pub host: String,
    pub port: u16,
    /// Worker pool size; values below the floor are rejected by `validate`.
    pub workers: usize,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            workers: default_workers(),
        }
    }
}

fn default_workers() -> usize {
    4
}

impl ProviderSettings {
    /// Worker count with the floor applied.
    pub fn effective_workers(&self) -> usize {
        self.workers.max(MIN_WORKERS)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub host: String,
    pub port: u16,
    pub session_timeout_ms: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 2181,
            session_timeout_ms: default_session_timeout_ms(),
        }
    }
}

fn default_session_timeout_ms() -> u64 {
    30_000
}

impl StoreSettings {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WireSettings {
    pub endian: Endian,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub stdout: bool,
    pub format: LogFormat,
    pub filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            stdout: true,
            format: LogFormat::Compact,
            filter: None,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.provider.host.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "provider.host".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if self.store.host.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "store.host".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if self.provider.workers < MIN_WORKERS {
            return Err(ConfigError::InvalidValue {
                key: "provider.workers".to_string(),
                reason: format!("must be at least {MIN_WORKERS}"),
            });
        }
        if self.store.session_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "store.session_timeout_ms".to_string(),
                reason: "must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}
