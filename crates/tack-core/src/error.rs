//! Error taxonomy shared by every core component.

use std::fmt;
use thiserror::Error;

/// Core errors.
///
/// `Validation`, `NotFound` and `Forbidden` are terminal: callers must not
/// retry them. Fan-out and broadcast failures never surface here; they are
/// logged and absorbed where they happen.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Malformed id or payload shape.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Target, or its parent chain, does not resolve.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Target exists but the caller's role is insufficient.
    #[error("Forbidden: {reason}")]
    Forbidden { reason: String },

    /// The mutation contradicts current state (e.g. removing the owner).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Persistence collaborator failure.
    #[error("Store error: {0}")]
    Store(String),
}

impl CoreError {
    pub fn not_found(entity: &'static str, id: impl fmt::Display) -> Self {
        CoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn forbidden(reason: impl Into<String>) -> Self {
        CoreError::Forbidden {
            reason: reason.into(),
        }
    }

    /// Wire error code used in `error` frames.
    #[must_use]
    pub fn error_code(&self) -> u16 {
        match self {
            CoreError::Validation(_) => 1001,
            CoreError::Forbidden { .. } => 1003,
            CoreError::NotFound { .. } => 1004,
            CoreError::Conflict(_) => 1009,
            CoreError::Store(_) => 1500,
        }
    }

    /// Whether a retry could possibly succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Store(_))
    }
}

/// Result alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
