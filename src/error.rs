//! Error types for Habit Core.
//!
//! This module defines all error types used throughout the library.

use thiserror::Error;

/// Result type alias for Habit operations
pub type HabitResult<T> = Result<T, HabitError>;

/// Main error type for Habit operations
#[derive(Error, Debug)]
pub enum HabitError {
    #[error("Validation error in {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("Store operation failed: {0}")]
    StoreOperation(String),

    #[error("Sync error: {0}")]
    Sync(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Queue capacity exceeded ({0} records)")]
    CapacityExceeded(usize),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("UUID error: {0}")]
    Uuid(#[from] uuid::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

impl HabitError {
    /// Create a new validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        HabitError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new sync error
    pub fn sync(message: impl Into<String>) -> Self {
        HabitError::Sync(message.into())
    }

    /// Create a new network error
    pub fn network(message: impl Into<String>) -> Self {
        HabitError::Network(message.into())
    }

    /// Create a new store operation error
    pub fn store_op(message: impl Into<String>) -> Self {
        HabitError::StoreOperation(message.into())
    }

    /// True when the failure is a transport-level one that a later
    /// dispatch cycle may succeed at (as opposed to a per-record
    /// logic failure, which is terminal).
    pub fn is_retryable(&self) -> bool {
        matches!(self, HabitError::Network(_) | HabitError::Sync(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = HabitError::validation("surah", "must be between 1 and 114");
        assert_eq!(
            err.to_string(),
            "Validation error in surah: must be between 1 and 114"
        );
    }

    #[test]
    fn test_capacity_error_display() {
        let err = HabitError::CapacityExceeded(100);
        assert_eq!(err.to_string(), "Queue capacity exceeded (100 records)");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(HabitError::network("connection refused").is_retryable());
        assert!(HabitError::sync("HTTP 503").is_retryable());
        assert!(!HabitError::validation("payload", "missing field").is_retryable());
        assert!(!HabitError::CapacityExceeded(100).is_retryable());
    }
}
