//! Error types for the Tollgate service.

use std::time::Duration;

use thiserror::Error;

/// Main error type for Tollgate operations.
///
/// A denied request is not an error: it is reported as a
/// [`Decision`](crate::ratelimit::Decision) with `admitted == false`.
#[derive(Error, Debug)]
pub enum TollgateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The shared store rejected the operation or could not be reached
    #[error("Store error: {0}")]
    Store(#[from] redis::RedisError),

    /// The store did not answer within the caller's deadline
    #[error("Store operation timed out after {0:?}")]
    Timeout(Duration),

    /// The store answered with something the limiter cannot interpret
    #[error("Unexpected store reply: {0}")]
    UnexpectedReply(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TollgateError {
    /// Whether this error came from the store path rather than from setup.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            TollgateError::Store(_) | TollgateError::Timeout(_) | TollgateError::UnexpectedReply(_)
        )
    }
}

/// Result type alias for Tollgate operations.
pub type Result<T> = std::result::Result<T, TollgateError>;
