//! Error taxonomy shared by every core operation.
//!
//! Lifecycle operations return an explicit `Result`; a failed precondition
//! is a typed error, never a silent no-op or a defaulted value.

use thiserror::Error;

/// Result alias used throughout the core crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed input (empty title, past-dated schedule, unknown assignee).
    /// The operation was not attempted.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The caller lacks the role or ownership the operation requires.
    /// Kept distinct from `NotFound`; see DESIGN.md.
    #[error("permission denied: {0}")]
    Permission(String),

    /// The referenced ticket or user does not exist, or is outside the
    /// caller's scope.
    #[error("not found: {0}")]
    NotFound(String),

    /// The ticket exists but is not in a state the transition accepts.
    #[error("transition rejected: {0}")]
    Transition(String),

    /// The underlying store is unreachable or a statement failed. The
    /// dispatch scheduler retries these with backoff; interactive callers
    /// see them immediately.
    #[error("store unavailable: {0}")]
    Store(#[from] rusqlite::Error),
}

impl Error {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub(crate) fn permission(msg: impl Into<String>) -> Self {
        Error::Permission(msg.into())
    }

    pub(crate) fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    pub(crate) fn transition(msg: impl Into<String>) -> Self {
        Error::Transition(msg.into())
    }
}
