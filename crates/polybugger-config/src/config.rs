//! The configuration model and its env loader.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Prefix of every configuration variable.
pub const ENV_PREFIX: &str = "PYBUGGER_MCP_";

/// Broker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// HTTP bind host.
    pub host: String,
    /// HTTP bind port.
    pub port: u16,
    /// Maximum concurrent sessions.
    pub max_sessions: usize,
    /// Idle session cutoff in seconds.
    pub session_timeout_secs: u64,
    /// Persistence root.
    pub data_dir: PathBuf,
    /// Log filter level (trace|debug|info|warn|error).
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 5679,
            max_sessions: 10,
            session_timeout_secs: 3600,
            data_dir: default_data_dir(),
            log_level: "info".into(),
        }
    }
}

/// Default persistence root: `$HOME/.polybugger-mcp`, `/tmp` fallback.
fn default_data_dir() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".polybugger-mcp"),
        None => PathBuf::from("/tmp/polybugger-mcp"),
    }
}

/// Load configuration from the process environment.
pub fn load_from_env() -> Result<Config, ConfigError> {
    load_with(|name| std::env::var(name).ok())
}

/// Load configuration through a variable lookup (tests inject one).
pub fn load_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Config, ConfigError> {
    let mut config = Config::default();

    if let Some(host) = lookup_var(&lookup, "HOST") {
        config.host = host;
    }
    if let Some(port) = lookup_var(&lookup, "PORT") {
        config.port = parse_var("PORT", &port)?;
    }
    if let Some(max) = lookup_var(&lookup, "MAX_SESSIONS") {
        config.max_sessions = parse_var("MAX_SESSIONS", &max)?;
    }
    if let Some(timeout) = lookup_var(&lookup, "SESSION_TIMEOUT_SECONDS") {
        config.session_timeout_secs = parse_var("SESSION_TIMEOUT_SECONDS", &timeout)?;
    }
    if let Some(dir) = lookup_var(&lookup, "DATA_DIR") {
        config.data_dir = PathBuf::from(dir);
    }
    if let Some(level) = lookup_var(&lookup, "LOG_LEVEL") {
        config.log_level = level.to_ascii_lowercase();
    }

    validate(&config)?;
    Ok(config)
}

fn lookup_var(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(&format!("{ENV_PREFIX}{name}"))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::Parse {
        variable: format!("{ENV_PREFIX}{name}"),
        message: e.to_string(),
    })
}

/// Check the invariants a loaded config must satisfy.
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.host.is_empty() {
        return Err(ConfigError::Validation {
            field: "host".into(),
            message: "must not be empty".into(),
        });
    }
    if config.max_sessions == 0 {
        return Err(ConfigError::Validation {
            field: "max_sessions".into(),
            message: "must be at least 1".into(),
        });
    }
    if config.session_timeout_secs == 0 {
        return Err(ConfigError::Validation {
            field: "session_timeout_secs".into(),
            message: "must be at least 1".into(),
        });
    }
    if !matches!(
        config.log_level.as_str(),
        "trace" | "debug" | "info" | "warn" | "error"
    ) {
        return Err(ConfigError::Validation {
            field: "log_level".into(),
            message: format!(
                "unknown level '{}', use trace|debug|info|warn|error",
                config.log_level
            ),
        });
    }
    Ok(())
}
