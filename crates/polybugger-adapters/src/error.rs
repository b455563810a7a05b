//! Adapter profile errors.

use thiserror::Error;

/// Errors from building launch/attach envelopes.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The requested language has no profile.
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    /// The launch configuration is incomplete or contradictory.
    #[error("invalid launch configuration: {0}")]
    InvalidLaunch(String),

    /// The attach configuration is incomplete or contradictory.
    #[error("invalid attach configuration: {0}")]
    InvalidAttach(String),
}
