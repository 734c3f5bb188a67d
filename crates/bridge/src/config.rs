//! Configuration management for ShellBridge.
//!
//! This module provides TOML-based configuration loading and saving. Every
//! section has defaults, so an empty file (or no file) is a valid config.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use protocol::{DEFAULT_COLS, DEFAULT_ROWS, DEFAULT_TERM};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be greater than 0")]
    ZeroCapacity { name: &'static str },

    #[error("terminal size must be non-zero, got {cols}x{rows}")]
    InvalidTerminalSize { cols: u32, rows: u32 },

    #[error("term must not be empty")]
    EmptyTerm,

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Default capacity of the host → transport chunk queue.
pub const DEFAULT_INBOUND_QUEUE_CAPACITY: usize = 100;

/// Default capacity of the session → remote stdin queue.
pub const DEFAULT_OUTBOUND_QUEUE_CAPACITY: usize = 100;

/// Default capacity of each stream's observer notification queue.
pub const DEFAULT_NOTIFICATION_QUEUE_CAPACITY: usize = 256;

/// Default buffer size for shell output reads.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 4096;

/// Main configuration structure for ShellBridge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct BridgeConfig {
    /// Host transport settings.
    pub transport: TransportConfig,

    /// Session settings.
    pub session: SessionConfig,

    /// Observer notification settings.
    pub observer: ObserverConfig,

    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Host transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransportConfig {
    /// Maximum number of injected chunks waiting to be read.
    pub inbound_queue_capacity: usize,
}

/// Session configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Maximum number of sends waiting for the remote stdin.
    pub outbound_queue_capacity: usize,

    /// Terminal type requested with the pty.
    pub term: String,

    /// Initial terminal height.
    pub rows: u32,

    /// Initial terminal width.
    pub cols: u32,

    /// Buffer size for stdout/stderr reads.
    pub read_buffer_size: usize,
}

/// Observer notification configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ObserverConfig {
    /// Maximum number of pending stream notifications before new ones are dropped.
    pub notification_queue_capacity: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub level: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            inbound_queue_capacity: DEFAULT_INBOUND_QUEUE_CAPACITY,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: DEFAULT_OUTBOUND_QUEUE_CAPACITY,
            term: DEFAULT_TERM.to_string(),
            rows: DEFAULT_ROWS,
            cols: DEFAULT_COLS,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            notification_queue_capacity: DEFAULT_NOTIFICATION_QUEUE_CAPACITY,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl BridgeConfig {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported variables:
    /// - SHELLBRIDGE_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("SHELLBRIDGE_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log level from environment: {}", level);
                self.logging.level = level;
            }
        }
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.transport.inbound_queue_capacity == 0 {
            return Err(ConfigError::ZeroCapacity {
                name: "inbound_queue_capacity",
            });
        }
        if self.session.outbound_queue_capacity == 0 {
            return Err(ConfigError::ZeroCapacity {
                name: "outbound_queue_capacity",
            });
        }
        if self.session.read_buffer_size == 0 {
            return Err(ConfigError::ZeroCapacity {
                name: "read_buffer_size",
            });
        }
        if self.observer.notification_queue_capacity == 0 {
            return Err(ConfigError::ZeroCapacity {
                name: "notification_queue_capacity",
            });
        }

        if self.session.rows == 0 || self.session.cols == 0 {
            return Err(ConfigError::InvalidTerminalSize {
                cols: self.session.cols,
                rows: self.session.rows,
            });
        }
        if self.session.term.trim().is_empty() {
            return Err(ConfigError::EmptyTerm);
        }

        let level = self.logging.level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.logging.level.clone()));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file, creating parent directories.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
