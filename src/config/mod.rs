//! Configuration module for the serial line agent.
//!
//! This module provides TOML-based configuration with environment variable overrides.
//!
//! # Configuration Resolution
//!
//! Configuration is loaded from the following locations (in order of priority):
//!
//! 1. `SERIAL_AGENT_CONFIG` environment variable (explicit path)
//! 2. `./config.toml` (current directory)
//! 3. `<platform config dir>/serial-line-agent/config.toml`
//! 4. Built-in defaults (no file required)
//!
//! # Environment Overrides
//!
//! Values can be overridden via environment variables named
//! `SERIAL_AGENT_<SECTION>_<KEY>`:
//!
//! - `SERIAL_AGENT_SERIAL_DEFAULT_BAUD=115200`
//! - `SERIAL_AGENT_CATALOG_CACHE_TTL_MS=2000`
//! - `SERIAL_AGENT_LOGGING_LEVEL=debug`
//!
//! The short names `SERIAL_PORT`, `SERIAL_BAUD_RATE` and
//! `SERIAL_BUFFER_LENGTH` are also honored.
//!
//! # Example
//!
//! ```rust,no_run
//! use serial_line_agent::config::ConfigLoader;
//!
//! let loader = ConfigLoader::load()?;
//! let config = loader.config();
//! println!("Default port: {}", config.serial.default_port);
//! # Ok::<(), serial_line_agent::config::ConfigError>(())
//! ```

mod error;
mod loader;
mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{
    get_default_config_dir, get_default_config_path, resolve_config_path, ConfigLoader,
};
pub use schema::{CatalogConfig, Config, LogFormat, LoggingConfig, SerialConfig};
