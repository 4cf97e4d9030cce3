//! Configuration loader with file resolution and environment override support.

use super::error::{ConfigError, ConfigResult};
use super::schema::Config;
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// Environment variable prefix for overrides
const ENV_PREFIX: &str = "SERIAL_AGENT";

/// Config file name
const CONFIG_FILE_NAME: &str = "config.toml";

/// Environment variable for explicit config path
const CONFIG_PATH_ENV: &str = "SERIAL_AGENT_CONFIG";

/// Configuration loader with resolution and override logic.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Resolved config file path (if any)
    pub config_path: Option<PathBuf>,
    /// The loaded configuration
    pub config: Config,
}

impl ConfigLoader {
    /// Load configuration using standard resolution order.
    ///
    /// Resolution priority (highest to lowest):
    /// 1. `SERIAL_AGENT_CONFIG` environment variable (explicit path)
    /// 2. `./config.toml` (current directory)
    /// 3. The platform config directory for `serial-line-agent`
    /// 4. Built-in defaults (no file required)
    ///
    /// Environment variables override file values; the result is validated.
    pub fn load() -> ConfigResult<Self> {
        let config_path = resolve_config_path();

        let mut config = match config_path {
            Some(ref path) => load_from_file(path)?,
            None => Config::default(),
        };
        apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(Self {
            config_path,
            config,
        })
    }

    /// Load configuration from a specific file path, which must exist.
    pub fn load_from(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(ConfigError::NotFound(path));
        }
        let mut config = load_from_file(&path)?;
        apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(Self {
            config_path: Some(path),
            config,
        })
    }

    /// Defaults plus environment overrides, no file.
    pub fn with_defaults() -> ConfigResult<Self> {
        let mut config = Config::default();
        apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(Self {
            config_path: None,
            config,
        })
    }

    /// Get the loaded configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Consume the loader and return the configuration.
    pub fn into_config(self) -> Config {
        self.config
    }
}

/// Resolve the configuration file path using standard locations.
pub fn resolve_config_path() -> Option<PathBuf> {
    // 1. Explicit environment variable
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
        debug!("{} points at missing file {}", CONFIG_PATH_ENV, path.display());
    }

    // 2. Current directory
    let cwd_config = PathBuf::from(CONFIG_FILE_NAME);
    if cwd_config.exists() {
        return Some(cwd_config);
    }

    // 3. Platform config directory
    if let Some(app_config) = get_default_config_path() {
        if app_config.exists() {
            return Some(app_config);
        }
    }

    None
}

/// Platform config directory for this program.
pub fn get_default_config_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "serial-line-agent").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Platform config file path for this program.
pub fn get_default_config_path() -> Option<PathBuf> {
    get_default_config_dir().map(|d| d.join(CONFIG_FILE_NAME))
}

/// Load configuration from a file.
fn load_from_file(path: &Path) -> ConfigResult<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })?;

    debug!("Loaded configuration from {}", path.display());
    toml::from_str(&content).map_err(ConfigError::ParseError)
}

/// First set variable among `names`.
fn env_lookup(names: &[&str]) -> Option<(String, String)> {
    names
        .iter()
        .find_map(|name| std::env::var(name).ok().map(|v| (name.to_string(), v)))
}

fn parse_env<T: FromStr>(var: &str, value: &str, what: &str) -> ConfigResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::env_parse(var, format!("Invalid {}: '{}'", what, value)))
}

/// Apply environment variable overrides to the configuration.
///
/// Prefixed variables follow `SERIAL_AGENT_<SECTION>_<KEY>`. The short names
/// `SERIAL_PORT`, `SERIAL_BAUD_RATE` and `SERIAL_BUFFER_LENGTH` are accepted
/// for the three session defaults; the prefixed name wins when both are set.
fn apply_env_overrides(config: &mut Config) -> ConfigResult<()> {
    let port_var = format!("{}_SERIAL_DEFAULT_PORT", ENV_PREFIX);
    let baud_var = format!("{}_SERIAL_DEFAULT_BAUD", ENV_PREFIX);
    let buffer_var = format!("{}_SERIAL_DEFAULT_BUFFER_LENGTH", ENV_PREFIX);
    let timeout_var = format!("{}_SERIAL_READ_TIMEOUT_MS", ENV_PREFIX);
    let ttl_var = format!("{}_CATALOG_CACHE_TTL_MS", ENV_PREFIX);
    let level_var = format!("{}_LOGGING_LEVEL", ENV_PREFIX);
    let file_var = format!("{}_LOGGING_FILE", ENV_PREFIX);

    // Serial overrides
    if let Some((_, val)) = env_lookup(&[port_var.as_str(), "SERIAL_PORT"]) {
        config.serial.default_port = val;
    }
    if let Some((var, val)) = env_lookup(&[baud_var.as_str(), "SERIAL_BAUD_RATE"]) {
        config.serial.default_baud = parse_env(&var, &val, "baud rate")?;
    }
    if let Some((var, val)) = env_lookup(&[buffer_var.as_str(), "SERIAL_BUFFER_LENGTH"]) {
        config.serial.default_buffer_length = parse_env(&var, &val, "buffer length")?;
    }
    if let Some((var, val)) = env_lookup(&[timeout_var.as_str()]) {
        config.serial.read_timeout_ms = parse_env(&var, &val, "timeout")?;
    }

    // Catalog overrides
    if let Some((var, val)) = env_lookup(&[ttl_var.as_str()]) {
        config.catalog.cache_ttl_ms = parse_env(&var, &val, "cache TTL")?;
    }

    // Logging overrides
    if let Some((_, val)) = env_lookup(&[level_var.as_str()]) {
        config.logging.level = val;
    }
    if let Some((_, val)) = env_lookup(&[file_var.as_str()]) {
        config.logging.file = Some(PathBuf::from(val));
    }

    Ok(())
}
