//! Error types for the mesh-alerts crate.

use thiserror::Error;

/// Errors that can occur while handling alerts.
#[derive(Debug, Error)]
pub enum AlertError {
    /// Alert with the given fingerprint was not found.
    #[error("alert not found: {fingerprint}")]
    AlertNotFound {
        /// The fingerprint that was not found.
        fingerprint: String,
    },

    /// A label matcher could not be constructed.
    #[error("invalid matcher {name:?}: {reason}")]
    InvalidMatcher {
        /// The label name the matcher targets.
        name: String,
        /// The reason the matcher is invalid.
        reason: String,
    },

    /// A label name is not well formed.
    #[error("invalid label name: {name:?}")]
    InvalidLabelName {
        /// The offending label name.
        name: String,
    },

    /// The alert failed validation before being stored.
    #[error("invalid alert: {reason}")]
    InvalidAlert {
        /// The reason the alert is invalid.
        reason: String,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for AlertError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

/// Result type for alert operations.
pub type Result<T> = std::result::Result<T, AlertError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_alert_not_found() {
        let err = AlertError::AlertNotFound {
            fingerprint: "00000000deadbeef".to_string(),
        };
        assert_eq!(err.to_string(), "alert not found: 00000000deadbeef");
    }

    #[test]
    fn error_display_invalid_matcher() {
        let err = AlertError::InvalidMatcher {
            name: "pod".to_string(),
            reason: "unclosed group".to_string(),
        };
        assert_eq!(err.to_string(), "invalid matcher \"pod\": unclosed group");
    }

    #[test]
    fn error_display_invalid_label_name() {
        let err = AlertError::InvalidLabelName {
            name: "0bad".to_string(),
        };
        assert_eq!(err.to_string(), "invalid label name: \"0bad\"");
    }

    #[test]
    fn error_display_invalid_alert() {
        let err = AlertError::InvalidAlert {
            reason: "no labels".to_string(),
        };
        assert_eq!(err.to_string(), "invalid alert: no labels");
    }

    #[test]
    fn error_from_serde_json() {
        let json_err = serde_json::from_str::<String>("invalid json");
        assert!(json_err.is_err());
        let alert_err: AlertError = json_err.unwrap_err().into();
        assert!(matches!(alert_err, AlertError::SerializationError(_)));
    }
}
