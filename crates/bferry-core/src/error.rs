//! Error types for bferry core

use thiserror::Error;

/// Errors that can occur while orchestrating transfers
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Invalid range {start}-{end} for object of {size} bytes")]
    InvalidRange { start: u64, end: u64, size: u64 },

    #[error("Expected {expected} bytes but received {actual}")]
    UnexpectedLength { expected: u64, actual: u64 },

    #[error("Server error: {status} - {message}")]
    ServerError { status: u16, message: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Transfer was cancelled")]
    Cancelled,

    #[error("Transfer timed out")]
    Timeout,

    #[error("Transfer task failed: {0}")]
    TaskFailed(String),
}

impl TransferError {
    /// Check if this error is retryable
    ///
    /// Nothing in the orchestration layer retries; callers and store
    /// implementations use this to decide.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransferError::Network(_) | TransferError::Timeout => true,
            TransferError::ServerError { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// True for cancellation and deadline expiry
    pub fn is_interrupted(&self) -> bool {
        matches!(self, TransferError::Cancelled | TransferError::Timeout)
    }
}

impl From<url::ParseError> for TransferError {
    fn from(error: url::ParseError) -> Self {
        TransferError::InvalidUrl(error.to_string())
    }
}

impl From<serde_json::Error> for TransferError {
    fn from(error: serde_json::Error) -> Self {
        TransferError::Serialization(error.to_string())
    }
}
