//! Error types for configuration loading.

use thiserror::Error;

/// Primary error type for configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Field contained a value that could not be parsed.
    #[error("unparseable configuration field")]
    Unparseable {
        /// Environment key that failed to parse.
        key: String,
        /// Raw value supplied by the caller.
        value: String,
        /// Expected shape of the value.
        expected: &'static str,
    },
    /// Field parsed but violated a constraint.
    #[error("invalid configuration field")]
    InvalidField {
        /// Logical field name.
        field: &'static str,
        /// Offending value when available.
        value: Option<String>,
        /// Machine-readable reason for the failure.
        reason: &'static str,
    },
}

/// Convenience alias for configuration results.
pub type ConfigResult<T> = Result<T, ConfigError>;
