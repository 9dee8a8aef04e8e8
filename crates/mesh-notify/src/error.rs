//! Error types for the mesh-notify crate.

use thiserror::Error;

/// Errors that can occur while delivering notifications.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The request could not be sent or its response not read.
    #[error("request failed: {reason}")]
    Request {
        /// The transport error.
        reason: String,
        /// Whether a retry may succeed.
        retryable: bool,
    },

    /// The target answered with a non-success HTTP status.
    #[error("unexpected status code {status}")]
    Status {
        /// The HTTP status code.
        status: u16,
    },

    /// The target accepted the request but reported an application error.
    #[error("rejected with code {code}: {message}")]
    Rejected {
        /// The application-level code.
        code: i64,
        /// The application-level message.
        message: String,
    },

    /// The payload could not be rendered.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// An integration could not be built from its configuration.
    #[error("invalid integration {integration}: {reason}")]
    InvalidIntegration {
        /// The integration name.
        integration: String,
        /// The reason it is invalid.
        reason: String,
    },

    /// No receiver with this name exists in the pipeline.
    #[error("receiver not found: {name}")]
    ReceiverNotFound {
        /// The receiver name.
        name: String,
    },

    /// Several integrations failed.
    #[error("{} integration(s) failed: {}", .errors.len(), .errors.join("; "))]
    Multiple {
        /// Rendered errors, one per failed integration.
        errors: Vec<String>,
        /// Whether any of the failures may succeed on retry.
        retryable: bool,
    },
}

impl NotifyError {
    /// Returns true if retrying the same request may succeed.
    #[must_use]
    pub const fn retryable(&self) -> bool {
        match self {
            Self::Request { retryable, .. } | Self::Multiple { retryable, .. } => *retryable,
            Self::Status { .. } | Self::Rejected { .. } => true,
            Self::Serialization(_) | Self::InvalidIntegration { .. } | Self::ReceiverNotFound { .. } => {
                false
            }
        }
    }
}

impl From<serde_json::Error> for NotifyError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for NotifyError {
    fn from(err: reqwest::Error) -> Self {
        let retryable = err.is_timeout() || err.is_connect() || err.is_request() || err.is_body();
        Self::Request {
            reason: err.without_url().to_string(),
            retryable,
        }
    }
}

/// Result type for notification operations.
pub type Result<T> = std::result::Result<T, NotifyError>;
