//! Configuration schema definitions.
//!
//! This module defines the structure of the configuration file using serde.
//! All configuration sections are defined here with appropriate defaults.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use super::error::{ConfigError, ConfigResult};
use crate::catalog::{default_usb_patterns, CatalogSettings};
use crate::port::{DataBits, FlowControl, Parity, PortConfiguration, StopBits};
use crate::service::{ManagerSettings, CLOSE_GRACE};
use crate::state::{SessionState, DEFAULT_BAUD_RATE, DEFAULT_BUFFER_LENGTH, DEFAULT_PORT_PATTERN};

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Serial line defaults
    pub serial: SerialConfig,
    /// Port discovery
    pub catalog: CatalogConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Reject values the session layer cannot work with.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.serial.default_port.trim().is_empty() {
            return Err(ConfigError::validation(
                "serial.default_port",
                "must not be empty",
            ));
        }
        if self.serial.default_baud == 0 {
            return Err(ConfigError::validation("serial.default_baud", "must be positive"));
        }
        if self.serial.default_buffer_length == 0 {
            return Err(ConfigError::validation(
                "serial.default_buffer_length",
                "must be positive",
            ));
        }
        if self.serial.read_timeout_ms == 0 {
            return Err(ConfigError::validation(
                "serial.read_timeout_ms",
                "must be positive",
            ));
        }
        if let Some(bad) = self
            .catalog
            .usb_patterns
            .iter()
            .find(|p| glob::Pattern::new(p).is_err())
        {
            return Err(ConfigError::validation(
                "catalog.usb_patterns",
                format!("invalid glob pattern '{}'", bad),
            ));
        }
        Ok(())
    }

    /// Settings for the connection manager.
    pub fn manager_settings(&self) -> ManagerSettings {
        ManagerSettings {
            line: self.serial.line_settings(),
            catalog: self.catalog.settings(),
            close_grace: CLOSE_GRACE,
        }
    }

    /// Disconnected session carrying the configured defaults.
    pub fn initial_session(&self) -> SessionState {
        SessionState::new(self.serial.default_baud, self.serial.default_buffer_length)
    }
}

/// Serial port configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Port used by `init` when none is given; may be a glob pattern
    pub default_port: String,
    /// Default baud rate for new connections
    pub default_baud: u32,
    /// Default message buffer capacity
    pub default_buffer_length: usize,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub flow_control: FlowControl,
    /// Device read timeout in milliseconds
    pub read_timeout_ms: u64,
    /// Port aliases for convenience
    #[serde(default)]
    pub port_aliases: HashMap<String, String>,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            default_port: DEFAULT_PORT_PATTERN.to_string(),
            default_baud: DEFAULT_BAUD_RATE,
            default_buffer_length: DEFAULT_BUFFER_LENGTH,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
            read_timeout_ms: 100,
            port_aliases: HashMap::new(),
        }
    }
}

impl SerialConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Line settings at the default baud rate.
    pub fn line_settings(&self) -> PortConfiguration {
        PortConfiguration {
            baud_rate: self.default_baud,
            data_bits: self.data_bits,
            flow_control: self.flow_control,
            parity: self.parity,
            stop_bits: self.stop_bits,
            timeout: self.read_timeout(),
        }
    }

    /// Resolve a port name through aliases
    pub fn resolve_port(&self, name: &str) -> String {
        self.port_aliases
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }
}

/// Port discovery section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// How long a non-empty port list is reused, in milliseconds
    pub cache_ttl_ms: u64,
    /// Globs scanned in addition to platform enumeration
    pub usb_patterns: Vec<String>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            cache_ttl_ms: 5000,
            usb_patterns: default_usb_patterns(),
        }
    }
}

impl CatalogConfig {
    pub fn settings(&self) -> CatalogSettings {
        CatalogSettings {
            cache_ttl: Duration::from_millis(self.cache_ttl_ms),
            usb_patterns: self.usb_patterns.clone(),
        }
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    /// Log file path (optional, in addition to stderr)
    pub file: Option<PathBuf>,
    /// Log format: "pretty", "compact"
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            format: LogFormat::Compact,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, human oriented
    Pretty,
    /// One line per event
    #[default]
    Compact,
}
