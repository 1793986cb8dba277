//! Error types for browser automation

use thiserror::Error;

/// Failures reported by a session provider or the page automation API
#[derive(Debug, Error)]
pub enum BrowserError {
    /// The provider refused or failed to open a session
    #[error("Session creation failed: {0}")]
    SessionCreation(String),

    /// The session is unknown to the provider (expired or already closed)
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Navigation did not reach the page
    #[error("Navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    /// Locating an element produced no usable selector
    #[error("Locate failed: {0}")]
    Locate(String),

    /// Extraction failed on the page
    #[error("Extraction failed: {0}")]
    Extraction(String),

    /// Extraction returned data that does not match the requested schema
    #[error("Schema mismatch: {0}")]
    Schema(String),

    /// A page action (click, type) failed
    #[error("Action failed: {0}")]
    Action(String),

    /// The remote side took too long
    #[error("Timed out: {0}")]
    Timeout(String),

    /// The automation service answered with an unexpected status
    #[error("Automation API error {status}: {message}")]
    Api { status: u16, message: String },

    /// Network or HTTP error
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid client configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl BrowserError {
    /// Whether repeating the same call could plausibly succeed.
    ///
    /// Schema mismatches, missing sessions and configuration problems are
    /// deterministic and never transient.
    pub fn is_transient(&self) -> bool {
        match self {
            BrowserError::Navigation { .. }
            | BrowserError::Timeout(_)
            | BrowserError::Extraction(_)
            | BrowserError::Locate(_)
            | BrowserError::SessionCreation(_) => true,
            BrowserError::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            BrowserError::Api { status, .. } => *status == 429 || *status >= 500,
            BrowserError::SessionNotFound(_)
            | BrowserError::Schema(_)
            | BrowserError::Action(_)
            | BrowserError::Json(_)
            | BrowserError::Config(_) => false,
        }
    }
}

/// Result type alias for browser operations
pub type Result<T> = std::result::Result<T, BrowserError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BrowserError::Navigation {
            url: "https://example.com".to_string(),
            reason: "net::ERR_CONNECTION_RESET".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Navigation to https://example.com failed: net::ERR_CONNECTION_RESET"
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(BrowserError::Timeout("nav".to_string()).is_transient());
        assert!(BrowserError::Api { status: 503, message: String::new() }.is_transient());
        assert!(BrowserError::Api { status: 429, message: String::new() }.is_transient());

        assert!(!BrowserError::Api { status: 400, message: String::new() }.is_transient());
        assert!(!BrowserError::Schema("missing field".to_string()).is_transient());
        assert!(!BrowserError::SessionNotFound("s-1".to_string()).is_transient());
    }
}
