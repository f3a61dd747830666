//! Shell configuration loading from file and environment variables.

use portsql_dml::ConnectionOptions;
use serde::Deserialize;
use thiserror::Error;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Connection settings.
    #[serde(default)]
    pub database: ConnectionOptions,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "portsql_dml=debug,warn").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults, then
/// applies environment overrides (see [`apply_overrides`]).
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_overrides(&mut config, |name| std::env::var(name).ok());
    Ok(config)
}

/// Applies overrides looked up by variable name:
///
/// - `PORTSQL_DB_HOST` overrides `database.host`
/// - `PORTSQL_DB_PORT` overrides `database.port`
/// - `PORTSQL_DB_USER` overrides `database.user`
/// - `PORTSQL_DB_PASS` overrides `database.pass`
/// - `PORTSQL_DB_NAME` overrides `database.dbname`
/// - `PORTSQL_DB_PREFIX` overrides `database.prefix`
/// - `PORTSQL_DB_DRIVER` overrides `database.driver`
/// - `PORTSQL_LOG_LEVEL` overrides `logging.level`
/// - `PORTSQL_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// Values that do not parse are ignored.
pub fn apply_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    let db = &mut config.database;
    if let Some(host) = var("PORTSQL_DB_HOST") {
        db.host = host;
    }
    if let Some(port) = var("PORTSQL_DB_PORT") {
        if let Ok(parsed) = port.parse() {
            db.port = parsed;
        }
    }
    if let Some(user) = var("PORTSQL_DB_USER") {
        db.user = user;
    }
    if let Some(pass) = var("PORTSQL_DB_PASS") {
        db.pass = pass;
    }
    if let Some(name) = var("PORTSQL_DB_NAME") {
        db.dbname = name;
    }
    if let Some(prefix) = var("PORTSQL_DB_PREFIX") {
        db.prefix = prefix;
    }
    if let Some(driver) = var("PORTSQL_DB_DRIVER") {
        match driver.parse() {
            Ok(parsed) => db.driver = parsed,
            Err(err) => tracing::warn!(error = %err, "ignoring PORTSQL_DB_DRIVER"),
        }
    }
    if let Some(level) = var("PORTSQL_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("PORTSQL_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
}
