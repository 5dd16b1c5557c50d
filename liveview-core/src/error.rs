//! Error types for the liveview

use thiserror::Error;

/// Liveview-wide error type
#[derive(Error, Debug)]
pub enum LiveviewError {
    #[error("Datastore error: {0}")]
    Datastore(String),

    #[error("Timed out after {millis}ms: {operation}")]
    Timeout { operation: String, millis: u64 },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LiveviewError {
    pub fn datastore(msg: impl Into<String>) -> Self {
        LiveviewError::Datastore(msg.into())
    }

    pub fn timeout(operation: impl Into<String>, millis: u64) -> Self {
        LiveviewError::Timeout {
            operation: operation.into(),
            millis,
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        LiveviewError::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        LiveviewError::Internal(msg.into())
    }

    /// Whether the failure only affects the current tick
    ///
    /// Datastore hiccups and timeouts clear up on their own; configuration
    /// and internal errors will not.
    pub fn is_transient(&self) -> bool {
        matches!(self, LiveviewError::Datastore(_) | LiveviewError::Timeout { .. })
    }
}

/// Result type alias for liveview operations
pub type LiveviewResult<T> = Result<T, LiveviewError>;
