//! Configuration errors.

use thiserror::Error;

/// Errors from reading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable held an unparseable value.
    #[error("invalid value for {variable}: {message}")]
    Parse {
        /// The full variable name.
        variable: String,
        /// What went wrong.
        message: String,
    },

    /// A config value failed validation.
    #[error("validation error: {field}: {message}")]
    Validation {
        /// The field name.
        field: String,
        /// Human-readable description of the violation.
        message: String,
    },
}
