//! Error types for the Strata generator.

use thiserror::Error;

/// Top-level error type for generation operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenError {
    /// A placement CSP has no satisfying assignment; carries the
    /// user-visible stage message.
    #[error("{0}")]
    Infeasible(String),

    /// A stage exceeded its wall-clock budget; carries the user-visible
    /// stage message.
    #[error("{0}")]
    Timeout(String),

    /// Generation was cancelled by a regenerate request or force-stop.
    #[error("generation cancelled")]
    Cancelled,

    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),
}

/// Result type alias for generation operations.
pub type GenResult<T> = Result<T, GenError>;
