//! FMS engine error types.

use latchkey_core::ChangeId;
use thiserror::Error;

use crate::types::ProviderType;

/// Errors that can occur in the FMS synchronization engine.
///
/// The HTTP layer maps classifications to status codes:
/// [`is_validation`](FmsError::is_validation) → 400,
/// [`is_forbidden`](FmsError::is_forbidden) → 403,
/// [`is_not_found`](FmsError::is_not_found) → 404,
/// [`is_conflict`](FmsError::is_conflict) → 409.
#[derive(Debug, Error)]
pub enum FmsError {
    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A required request field is missing or malformed.
    #[error("Validation error: {field} is required")]
    Validation {
        /// Name of the missing or invalid field.
        field: String,
    },

    /// Requested entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Caller's accessible facilities exclude the target resource.
    ///
    /// Deliberately carries no facility identifier so the response can never
    /// disclose which facility the resource belongs to.
    #[error("Access denied")]
    Authorization,

    /// Unique-key or single-flight violation.
    #[error("Conflict: {message}")]
    Conflict { message: String },

    /// Provider adapter fetch failure.
    #[error("Provider error ({provider}): {message}")]
    Provider {
        provider: ProviderType,
        message: String,
    },

    /// Per-change failure during apply.
    #[error("Apply error for change {change_id}: {message}")]
    Apply { change_id: ChangeId, message: String },

    /// Configuration error (missing, disabled, or malformed FMS config).
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl FmsError {
    /// Create a validation error naming the offending field.
    pub fn validation(field: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
        }
    }

    /// Create a not found error.
    pub fn not_found(entity: impl Into<String>, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Create a conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Create a provider error.
    pub fn provider(provider: ProviderType, message: impl Into<String>) -> Self {
        Self::Provider {
            provider,
            message: message.into(),
        }
    }

    /// Create a per-change apply error.
    pub fn apply(change_id: ChangeId, message: impl Into<String>) -> Self {
        Self::Apply {
            change_id,
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Check if this error is a client-input validation failure.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, FmsError::Validation { .. })
    }

    /// Check if this error indicates a missing resource.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, FmsError::NotFound { .. })
    }

    /// Check if this error indicates denied access.
    #[must_use]
    pub fn is_forbidden(&self) -> bool {
        matches!(self, FmsError::Authorization)
    }

    /// Check if this error indicates a conflict.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, FmsError::Conflict { .. })
    }

    /// Check if this error is worth retrying with a new trigger.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, FmsError::Database(_) | FmsError::Provider { .. })
    }
}

/// Result type for FMS engine operations.
pub type FmsResult<T> = Result<T, FmsError>;
