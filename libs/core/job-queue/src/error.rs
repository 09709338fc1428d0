//! Queue error types and error categorization
//!
//! Errors are categorized to decide what the worker loop does next:
//! - **Transient**: the store or the processor failed temporarily, retry with backoff
//! - **Permanent**: retrying cannot help (bad config, corrupt data, rejected job)

use std::time::Duration;
use thiserror::Error;

/// Category of error for determining retry behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Temporary failure - retry with exponential backoff
    Transient,
    /// Unrecoverable error - never retried
    Permanent,
}

impl ErrorCategory {
    /// Calculate exponential backoff for the given attempt, capped at `max`.
    ///
    /// Permanent errors never back off.
    pub fn backoff(&self, base: Duration, max: Duration, attempt: u32) -> Duration {
        if *self == ErrorCategory::Permanent {
            return Duration::ZERO;
        }

        let factor = 2u32.saturating_pow(attempt.min(16));
        base.saturating_mul(factor).min(max)
    }
}

/// Queue errors
#[derive(Error, Debug)]
pub enum QueueError {
    /// Conflicting or malformed construction options
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The backing store could not be reached or rejected the command
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] redis::RedisError),

    /// The store did not answer within the configured response timeout
    #[error("Store did not respond within {0:?}")]
    StoreTimeout(Duration),

    /// Operation intentionally unsupported by this backend
    #[error("Operation not implemented: {0}")]
    NotImplemented(&'static str),

    /// A stored entry is not a valid encoded message
    #[error("Malformed stored message: {source}")]
    Decode {
        raw: String,
        #[source]
        source: serde_json::Error,
    },

    /// A message could not be encoded
    #[error("Failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    /// A processor rejected a message
    #[error("Processing error: {message}")]
    Processing {
        message: String,
        category: ErrorCategory,
    },
}

impl QueueError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        QueueError::Configuration(message.into())
    }

    /// Create a transient processing error
    pub fn transient(message: impl Into<String>) -> Self {
        QueueError::Processing {
            message: message.into(),
            category: ErrorCategory::Transient,
        }
    }

    /// Create a permanent processing error
    pub fn permanent(message: impl Into<String>) -> Self {
        QueueError::Processing {
            message: message.into(),
            category: ErrorCategory::Permanent,
        }
    }

    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            QueueError::StoreUnavailable(_) => ErrorCategory::Transient,
            QueueError::StoreTimeout(_) => ErrorCategory::Transient,
            QueueError::Processing { category, .. } => *category,
            QueueError::Configuration(_)
            | QueueError::NotImplemented(_)
            | QueueError::Decode { .. }
            | QueueError::Encode(_) => ErrorCategory::Permanent,
        }
    }

    /// Check if this error should trigger a retry
    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }

    /// Check if this error comes from the store rather than the queue logic
    pub fn is_store_error(&self) -> bool {
        matches!(
            self,
            QueueError::StoreUnavailable(_) | QueueError::StoreTimeout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;
