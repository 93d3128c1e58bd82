//! Core error types.
//!
//! Every manager operation returns [`CoreError`]. Variants map onto the HTTP
//! layer's response classes (the HTTP layer itself lives outside this crate):
//! validation and conflicts are client errors, external-service and internal
//! failures are server errors. Capacity and conflict messages carry the
//! concrete numbers and records involved so callers can explain denials.

use thiserror::Error;

/// Errors produced by the invitation and subscription managers.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Malformed input. No state was changed.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A referenced entity does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A uniqueness or state-transition violation.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Role or ownership check failed.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Plan-limit denial. Carries the limit and current count so the
    /// caller can explain the denial.
    #[error("Member limit reached: plan '{plan}' allows {limit} members, currently at {current}")]
    Capacity {
        /// Name of the plan whose limit was hit.
        plan: String,
        /// Current committed capacity (members plus pending invitations).
        current: u32,
        /// The plan's member limit.
        limit: u32,
    },

    /// A payment-processor or notification call failed. Distinguished from
    /// internal errors so retries can be targeted.
    #[error("External service error during '{operation}': {message}")]
    ExternalService {
        /// The external operation that failed.
        operation: String,
        /// Detail from the external service.
        message: String,
    },

    /// Storage failure or invariant violation detected at runtime.
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CoreError {
    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a not found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a conflict error.
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create a forbidden error.
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    /// Create a capacity error.
    pub fn capacity(plan: impl Into<String>, current: u32, limit: u32) -> Self {
        Self::Capacity {
            plan: plan.into(),
            current,
            limit,
        }
    }

    /// Create an external service error.
    pub fn external(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalService {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if this is a client error (caller can fix the request).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::NotFound(_)
                | Self::Conflict(_)
                | Self::Forbidden(_)
                | Self::Capacity { .. }
        )
    }

    /// Check if this error is retryable by the caller.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ExternalService { .. })
    }
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_message_names_limit_and_count() {
        let err = CoreError::capacity("Free", 4, 4);
        let msg = err.to_string();
        assert!(msg.contains("Free"));
        assert!(msg.contains('4'));
    }

    #[test]
    fn test_error_classification() {
        assert!(CoreError::conflict("dup").is_client_error());
        assert!(CoreError::capacity("Free", 4, 4).is_client_error());
        assert!(!CoreError::internal("boom").is_client_error());

        assert!(CoreError::external("checkout.create", "timeout").is_retryable());
        assert!(!CoreError::not_found("x").is_retryable());
    }
}
