//! Shared error taxonomy.
//!
//! Every failure that can cross a service boundary is one of these variants,
//! each with a stable client-facing code. Keep messages free of internal rule
//! identifiers and of any hint that another tenant's data exists.

use thiserror::Error;

/// Result type used across the security core.
pub type CoreResult<T> = Result<T, CoreError>;

/// Core error taxonomy.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// No actor or tenant could be resolved for the request.
    #[error("unauthenticated")]
    Unauthenticated,

    /// The tenant exists but is not active (e.g. suspended).
    #[error("tenant is not active")]
    TenantInactive,

    /// The RBAC evaluator denied the operation.
    ///
    /// Intentionally carries no detail: the denying rule must not leak.
    #[error("access denied")]
    AuthorizationDenied,

    /// A requested resource was not found (or is soft-deleted).
    #[error("not found")]
    NotFound,

    /// A value failed validation (e.g. malformed input, unknown sort key).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A uniqueness or state conflict (not a version mismatch).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Optimistic concurrency check failed; the caller should refetch and retry.
    #[error("version conflict (expected {expected}, actual {actual})")]
    OptimisticLock { expected: i64, actual: i64 },

    /// A number sequence hit its configured upper bound.
    #[error("sequence '{code}' is exhausted")]
    SequenceExhausted { code: String },

    /// Publishing session claims into the database transaction failed.
    ///
    /// Fatal to the enclosing transaction; never downgraded to "proceed
    /// without isolation".
    #[error("failed to publish session claims: {0}")]
    IsolationPublish(String),

    /// The transaction exceeded its deadline and was rolled back.
    #[error("operation timed out")]
    Timeout,

    /// Infrastructure/storage failure (connection, serialization, ...).
    #[error("storage error: {0}")]
    Storage(String),
}

impl CoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Stable, client-visible error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::TenantInactive => "tenant_inactive",
            Self::AuthorizationDenied => "authorization_denied",
            Self::NotFound => "not_found",
            Self::Validation(_) => "validation_failed",
            Self::Conflict(_) => "conflict",
            Self::OptimisticLock { .. } => "optimistic_lock",
            Self::SequenceExhausted { .. } => "sequence_exhausted",
            Self::IsolationPublish(_) => "isolation_publish",
            Self::Timeout => "timeout",
            Self::Storage(_) => "storage_error",
        }
    }

    /// Whether the caller may retry the operation as-is (after a refetch for
    /// version conflicts).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::OptimisticLock { .. } | Self::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(CoreError::Unauthenticated.code(), "unauthenticated");
        assert_eq!(CoreError::AuthorizationDenied.code(), "authorization_denied");
        assert_eq!(
            CoreError::OptimisticLock { expected: 1, actual: 2 }.code(),
            "optimistic_lock"
        );
        assert_eq!(
            CoreError::SequenceExhausted { code: "INV".into() }.code(),
            "sequence_exhausted"
        );
    }

    #[test]
    fn denial_message_has_no_detail() {
        assert_eq!(CoreError::AuthorizationDenied.to_string(), "access denied");
    }

    #[test]
    fn retryable_variants() {
        assert!(CoreError::Timeout.is_retryable());
        assert!(CoreError::OptimisticLock { expected: 0, actual: 1 }.is_retryable());
        assert!(!CoreError::AuthorizationDenied.is_retryable());
    }
}
