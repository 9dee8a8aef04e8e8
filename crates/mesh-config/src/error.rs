//! Error types for the mesh-config crate.

use thiserror::Error;

/// Errors that can occur while loading or applying configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read {path}: {reason}")]
    Io {
        /// The path that failed.
        path: String,
        /// The underlying error.
        reason: String,
    },

    /// The document is not valid YAML for the schema.
    #[error("failed to parse configuration: {reason}")]
    Parse {
        /// The parser error.
        reason: String,
    },

    /// The document parsed but is semantically invalid.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// The reason the configuration is invalid.
        reason: String,
    },

    /// A duration string is not in Prometheus syntax.
    #[error("invalid duration: {value:?}")]
    InvalidDuration {
        /// The offending text.
        value: String,
    },

    /// No configuration has been handed off yet.
    #[error("no configuration available yet")]
    NotReady,

    /// A reload subscriber rejected the new configuration.
    #[error("reload subscriber failed: {reason}")]
    SubscriberFailed {
        /// The subscriber's error.
        reason: String,
    },

    /// A reload trigger could not be installed.
    #[error("watch error: {reason}")]
    Watch {
        /// The reason the watch failed.
        reason: String,
    },
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Parse {
            reason: err.to_string(),
        }
    }
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;
