//! Error types for snapshot-core

use thiserror::Error;

/// Result type alias for snapshot-core
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for domain-level validation
#[derive(Error, Debug)]
pub enum Error {
    /// Ticker symbol failed validation
    #[error("Invalid ticker: {0:?}")]
    InvalidTicker(String),

    /// Unknown source name
    #[error("Unknown source: {0}")]
    UnknownSource(String),

    /// Configuration is missing or inconsistent
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidTicker("a b".to_string());
        assert_eq!(err.to_string(), "Invalid ticker: \"a b\"");

        let err = Error::Configuration("watchlist is empty".to_string());
        assert_eq!(err.to_string(), "Configuration error: watchlist is empty");
    }
}
