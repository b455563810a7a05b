//! polybugger-config — environment-driven configuration.
//!
//! All settings come from `PYBUGGER_MCP_`-prefixed environment variables
//! with documented defaults; there is no config file.

pub mod config;
pub mod error;

pub use config::{load_from_env, load_with, validate, Config, ENV_PREFIX};
pub use error::ConfigError;
