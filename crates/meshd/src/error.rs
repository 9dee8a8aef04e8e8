//! Error types for meshd.

use thiserror::Error;

/// Errors that can occur while starting or running the daemon.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// The settings file is unreadable or invalid.
    #[error("settings error: {0}")]
    Settings(String),

    /// A cluster client could not be built.
    #[error("cluster {name}: {reason}")]
    Cluster {
        /// The cluster name.
        name: String,
        /// Why the client could not be built.
        reason: String,
    },

    /// Recording an event into history failed.
    #[error("history error: {0}")]
    History(String),

    /// Routing configuration error.
    #[error(transparent)]
    Config(#[from] mesh_config::ConfigError),

    /// A notification pipeline could not be built.
    #[error(transparent)]
    Notify(#[from] mesh_notify::NotifyError),

    /// Kubernetes integration error.
    #[error(transparent)]
    Kube(#[from] mesh_kube::KubeError),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for daemon operations.
pub type Result<T> = std::result::Result<T, DaemonError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_settings() {
        let err = DaemonError::Settings("workers must be greater than 0".to_string());
        assert_eq!(err.to_string(), "settings error: workers must be greater than 0");
    }

    #[test]
    fn error_display_cluster() {
        let err = DaemonError::Cluster {
            name: "prod".to_string(),
            reason: "context not found".to_string(),
        };
        assert_eq!(err.to_string(), "cluster prod: context not found");
    }

    #[test]
    fn config_error_is_transparent() {
        let err = DaemonError::from(mesh_config::ConfigError::NotReady);
        assert_eq!(err.to_string(), "no configuration available yet");
    }
}
