//! Result and error types for Settle.

use std::time::Duration;
use thiserror::Error;

/// Result type for Settle operations
pub type SettleResult<T> = Result<T, SettleError>;

/// Errors that can occur in Settle
#[derive(Debug, Error)]
pub enum SettleError {
    /// A wait elapsed its deadline without the condition holding
    #[error("{label} timed out after {timeout_ms}ms")]
    Timeout {
        /// Caller-supplied label, embedded verbatim
        label: String,
        /// Configured deadline in milliseconds
        timeout_ms: u64,
    },

    /// A wait was cancelled before it settled
    #[error("{label} was cancelled")]
    Cancelled {
        /// Caller-supplied label
        label: String,
    },

    /// Target could not be queried right now (stale, detached, not yet attached)
    #[error("Observation failed: {message}")]
    Observation {
        /// Error message
        message: String,
    },

    /// External diff tool crashed, exited badly, or printed garbage
    #[error("Diff tool failed: {message}")]
    DiffTool {
        /// Error message
        message: String,
    },

    /// Screenshot capture failed
    #[error("Capture failed: {message}")]
    Capture {
        /// Error message
        message: String,
    },

    /// Click, key input or alert handling failed
    #[error("Action failed: {message}")]
    Action {
        /// Error message
        message: String,
    },

    /// Navigation error
    #[error("Navigation to {url} failed: {message}")]
    Navigation {
        /// URL that failed
        url: String,
        /// Error message
        message: String,
    },

    /// Browser launch or connection error
    #[error("Browser error: {message}")]
    Browser {
        /// Error message
        message: String,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

impl SettleError {
    /// Create a timeout error for a labeled wait
    #[must_use]
    pub fn timeout(label: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            label: label.into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Create a transient observation error
    #[must_use]
    pub fn observation(message: impl Into<String>) -> Self {
        Self::Observation {
            message: message.into(),
        }
    }

    /// Create a diff tool error
    #[must_use]
    pub fn diff_tool(message: impl Into<String>) -> Self {
        Self::DiffTool {
            message: message.into(),
        }
    }

    /// Create a capture error
    #[must_use]
    pub fn capture(message: impl Into<String>) -> Self {
        Self::Capture {
            message: message.into(),
        }
    }

    /// Create an action error
    #[must_use]
    pub fn action(message: impl Into<String>) -> Self {
        Self::Action {
            message: message.into(),
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Whether a poll may absorb this error and keep going
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Observation { .. })
    }

    /// Whether this is a deadline failure
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_embeds_label() {
        let err = SettleError::timeout("Spinner element", Duration::from_millis(30_000));
        let msg = err.to_string();
        assert!(msg.contains("Spinner element"));
        assert!(msg.contains("30000ms"));
    }

    #[test]
    fn test_only_observation_is_transient() {
        assert!(SettleError::observation("stale").is_transient());
        assert!(!SettleError::diff_tool("crash").is_transient());
        assert!(!SettleError::action("click").is_transient());
        assert!(!SettleError::timeout("x", Duration::from_millis(1)).is_transient());
    }

    #[test]
    fn test_is_timeout() {
        assert!(SettleError::timeout("x", Duration::from_secs(1)).is_timeout());
        assert!(!SettleError::capture("no page").is_timeout());
    }

    #[test]
    fn test_io_from() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: SettleError = io.into();
        assert!(matches!(err, SettleError::Io(_)));
    }
}
