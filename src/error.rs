//! Error types for pr-monitor
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

/// All error types that can occur in the monitor core
#[derive(Debug, Error)]
pub enum MonitorError {
    /// GitHub answered with a non-success status
    #[error("GitHub API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Transport-level failure talking to GitHub
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// SQLite failure
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Storage failure that is not a SQLite error (poisoned lock, bad row)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Notification subject URL without a trailing PR number
    #[error("Invalid subject URL: {0}")]
    InvalidSubjectUrl(String),

    /// A `owner/repo#N` key that does not parse
    #[error("Invalid PR key: {0}")]
    InvalidPrKey(String),

    /// A repository name that is not `owner/name`
    #[error("Invalid repository: {0}")]
    InvalidRepo(String),

    /// No credential covers the requested organization
    #[error("No GitHub client for: {0}")]
    NoClient(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MonitorError {
    /// True for 401/403 responses: the token lacks a scope or is invalid.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, MonitorError::Api { status: 401 | 403, .. })
    }
}

/// Result type alias for monitor operations
pub type Result<T> = std::result::Result<T, MonitorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_display() {
        let err = MonitorError::Api {
            status: 404,
            message: "Not Found".to_string(),
        };
        assert_eq!(err.to_string(), "GitHub API error (404): Not Found");
    }

    #[test]
    fn test_auth_failure_detection() {
        let forbidden = MonitorError::Api {
            status: 403,
            message: "missing notifications scope".to_string(),
        };
        let unauthorized = MonitorError::Api {
            status: 401,
            message: "bad credentials".to_string(),
        };
        let server = MonitorError::Api {
            status: 502,
            message: "bad gateway".to_string(),
        };

        assert!(forbidden.is_auth_failure());
        assert!(unauthorized.is_auth_failure());
        assert!(!server.is_auth_failure());
        assert!(!MonitorError::Storage("locked".to_string()).is_auth_failure());
    }

    #[test]
    fn test_invalid_pr_key_error() {
        let err = MonitorError::InvalidPrKey("acme/widgets".to_string());
        assert_eq!(err.to_string(), "Invalid PR key: acme/widgets");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: MonitorError = io_err.into();
        assert!(matches!(err, MonitorError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let err: MonitorError = json_err.into();
        assert!(matches!(err, MonitorError::Json(_)));
    }
}
