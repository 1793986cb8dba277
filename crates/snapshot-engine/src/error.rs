//! Error types for the fetch engine

use snapshot_core::FailureKind;
use thiserror::Error;

/// Task-level failure.
///
/// Every variant ends one fetch task and is converted into a `Failure`
/// result; none of them escapes the orchestrator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// Could not open a session or get a gate slot for one
    #[error("Session creation failed: {0}")]
    SessionCreation(String),

    /// Navigation failed after retries
    #[error("Navigation failed: {0}")]
    Navigation(String),

    /// Extraction failed after retries, or returned data of the wrong shape
    #[error("Extraction failed: {0}")]
    Extraction(String),

    /// One item of a batch failed
    #[error("Batch item failed: {0}")]
    BatchPartial(String),

    /// The run was cancelled while the task was in flight
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// The task died unexpectedly
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FetchError {
    /// Failure classification recorded in results and error records
    pub fn kind(&self) -> FailureKind {
        match self {
            FetchError::SessionCreation(_) => FailureKind::SessionCreation,
            FetchError::Navigation(_) => FailureKind::Navigation,
            FetchError::Extraction(_) => FailureKind::Extraction,
            FetchError::BatchPartial(_) => FailureKind::BatchPartial,
            FetchError::Cancelled(_) => FailureKind::Cancelled,
            FetchError::Internal(_) => FailureKind::Internal,
        }
    }
}

/// Run-level errors: configuration and persistence.
///
/// Only these may abort a run, and only before any task is scheduled
/// (configuration) or after all tasks settled (persistence).
#[derive(Debug, Error)]
pub enum EngineError {
    /// Missing or invalid settings, unreadable watchlist
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// File system error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Domain validation error
    #[error(transparent)]
    Core(#[from] snapshot_core::Error),
}

/// Result type alias for run-level operations
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FetchError::Navigation("https://example.com: timeout".to_string());
        assert_eq!(err.to_string(), "Navigation failed: https://example.com: timeout");

        let err = EngineError::Configuration("watchlist is empty".to_string());
        assert_eq!(err.to_string(), "Configuration error: watchlist is empty");
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(FetchError::SessionCreation(String::new()).kind(), FailureKind::SessionCreation);
        assert_eq!(FetchError::BatchPartial(String::new()).kind(), FailureKind::BatchPartial);
        assert_eq!(FetchError::Cancelled(String::new()).kind(), FailureKind::Cancelled);
    }

    #[test]
    fn test_core_error_conversion() {
        let core = snapshot_core::Error::InvalidTicker("A B".to_string());
        let err: EngineError = core.into();
        assert!(matches!(err, EngineError::Core(_)));
    }
}
