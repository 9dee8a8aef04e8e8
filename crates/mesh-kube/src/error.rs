//! Error types for the mesh-kube crate.

use thiserror::Error;

/// Errors raised by cluster sources and the route generator.
#[derive(Debug, Error)]
pub enum KubeError {
    /// A Kubernetes client could not be built or a request failed.
    #[error("kubernetes client error: {reason}")]
    Client {
        /// The underlying error.
        reason: String,
    },

    /// A cluster with this name is already being watched.
    #[error("cluster already registered: {name}")]
    DuplicateCluster {
        /// The cluster name.
        name: String,
    },

    /// An event route resource could not be turned into a route.
    #[error("invalid event route {key}: {reason}")]
    InvalidRoute {
        /// `namespace/name` of the resource.
        key: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The generated configuration was rejected.
    #[error("failed to generate routing configuration: {reason}")]
    Generate {
        /// The validation or serialization error.
        reason: String,
    },

    /// A resource could not be serialized.
    #[error("serialization error: {reason}")]
    Serialization {
        /// The serializer error.
        reason: String,
    },
}

impl From<kube::Error> for KubeError {
    fn from(err: kube::Error) -> Self {
        Self::Client {
            reason: err.to_string(),
        }
    }
}

impl From<mesh_config::ConfigError> for KubeError {
    fn from(err: mesh_config::ConfigError) -> Self {
        Self::Generate {
            reason: err.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for KubeError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization {
            reason: err.to_string(),
        }
    }
}

/// Result type for mesh-kube operations.
pub type Result<T> = std::result::Result<T, KubeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_duplicate_cluster() {
        let err = KubeError::DuplicateCluster {
            name: "prod-a".to_string(),
        };
        assert_eq!(err.to_string(), "cluster already registered: prod-a");
    }

    #[test]
    fn error_display_invalid_route() {
        let err = KubeError::InvalidRoute {
            key: "ns-a/pods".to_string(),
            reason: "bad regex".to_string(),
        };
        assert_eq!(err.to_string(), "invalid event route ns-a/pods: bad regex");
    }

    #[test]
    fn error_from_config() {
        let err = KubeError::from(mesh_config::ConfigError::NotReady);
        assert!(matches!(err, KubeError::Generate { .. }));
        assert!(err.to_string().contains("no configuration available yet"));
    }
}
