use std::{path::Path, time::Duration};

use serde::Deserialize;

use crate::collector::DEFAULT_SIZE_LIMIT;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid TOML at line {line}, column {column}: {message}")]
    InvalidToml {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("I/O error reading configuration: {0}")]
    Io(#[from] std::io::Error),
}

/// Tunables for stanza correlation on one connection.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct XmppConfig {
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub collectors: CollectorsConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutConfig {
    /// How long to wait for the direct answer to an IQ request.
    #[serde(default = "default_timeout_ms")]
    pub reply_ms: u64,
    /// How long a multi-stage read-out may stay silent before it fails.
    #[serde(default = "default_timeout_ms")]
    pub read_out_inactivity_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            reply_ms: default_timeout_ms(),
            read_out_inactivity_ms: default_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectorsConfig {
    #[serde(default = "default_size_limit")]
    pub size_limit: usize,
}

impl Default for CollectorsConfig {
    fn default() -> Self {
        Self {
            size_limit: default_size_limit(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    /// Capacity of the inbound channel drained by the reader task.
    #[serde(default = "default_channel_capacity")]
    pub inbound_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            inbound_capacity: default_channel_capacity(),
        }
    }
}

impl XmppConfig {
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.reply_ms)
    }

    pub fn read_out_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.read_out_inactivity_ms)
    }

    /// Parse configuration from a TOML string, applying environment overrides.
    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigError> {
        from_str_with_overrides(toml_str, ConfigOverrides::from_env())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }
}

#[derive(Debug, Default, Clone)]
struct ConfigOverrides {
    reply_ms: Option<u64>,
    read_out_inactivity_ms: Option<u64>,
}

impl ConfigOverrides {
    fn from_env() -> Self {
        Self {
            reply_ms: env_u64("PERCH_REPLY_TIMEOUT_MS"),
            read_out_inactivity_ms: env_u64("PERCH_READ_OUT_TIMEOUT_MS"),
        }
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok()?.trim().parse().ok()
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_size_limit() -> usize {
    DEFAULT_SIZE_LIMIT
}

fn default_channel_capacity() -> usize {
    256
}

fn from_str_with_overrides(
    toml_str: &str,
    overrides: ConfigOverrides,
) -> Result<XmppConfig, ConfigError> {
    let mut config: XmppConfig = toml::from_str(toml_str).map_err(|e| {
        let (line, column) = e.span().map_or((0, 0), |span| {
            let before = &toml_str[..span.start];
            let line = before.chars().filter(|&c| c == '\n').count() + 1;
            let column = before
                .rfind('\n')
                .map_or(span.start + 1, |nl| span.start - nl);
            (line, column)
        });
        ConfigError::InvalidToml {
            line,
            column,
            message: e.message().to_string(),
        }
    })?;

    if let Some(reply_ms) = overrides.reply_ms {
        config.timeouts.reply_ms = reply_ms;
    }
    if let Some(read_out_ms) = overrides.read_out_inactivity_ms {
        config.timeouts.read_out_inactivity_ms = read_out_ms;
    }

    validate(&config)?;
    Ok(config)
}

fn validate(config: &XmppConfig) -> Result<(), ConfigError> {
    let positive = [
        ("timeouts.reply_ms", config.timeouts.reply_ms),
        (
            "timeouts.read_out_inactivity_ms",
            config.timeouts.read_out_inactivity_ms,
        ),
        ("collectors.size_limit", config.collectors.size_limit as u64),
        (
            "connection.inbound_capacity",
            config.connection.inbound_capacity as u64,
        ),
    ];

    for (field, value) in positive {
        if value == 0 {
            return Err(ConfigError::InvalidValue {
                field: field.to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
    }
    Ok(())
}
