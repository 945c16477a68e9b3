//! Error types for the Pretender core.

/// Core error type for Pretender infrastructure.
#[derive(Debug, thiserror::Error)]
pub enum PretenderCoreError {
    /// Invalid AWS account ID format.
    #[error("invalid AWS account ID: {0} (must be 12-digit numeric string)")]
    InvalidAccountId(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal error with context.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Convenience result type for Pretender operations.
pub type PretenderCoreResult<T> = Result<T, PretenderCoreError>;
