pub mod inventory;
pub mod models;
pub mod payment;
pub mod repository;

/// Failure taxonomy shared by every component of the saga.
///
/// Seat conflicts and payment declines are user-correctable; provider
/// outages, integrity and storage problems are reported opaquely at the edge.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Tickets not found: {missing:?}")]
    PartialNotFound { missing: Vec<i64> },
    #[error("Seat not available: {0}")]
    SeatConflict(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("External service error: {0}")]
    ExternalService(String),
    #[error("Payment error: {0}")]
    Payment(String),
    #[error("Payment provider not configured: {0}")]
    ProviderUnavailable(String),
    /// Provider did not answer in time or the transport failed; the payment
    /// may still go through on a later attempt.
    #[error("Payment provider unreachable: {0}")]
    ProviderUnreachable(String),
    #[error("Operation not supported by provider: {0}")]
    Unsupported(String),
    #[error("Not authorized: {0}")]
    Authorization(String),
    #[error("Integrity error: {0}")]
    Integrity(String),
    #[error("Storage error: {0}")]
    Storage(String),
}

impl CoreError {
    /// Failures a caller may retry without changing its input.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::ExternalService(_) | CoreError::ProviderUnreachable(_) | CoreError::Storage(_)
        )
    }

    /// Short machine-readable code used in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Validation(_) => "validation",
            CoreError::NotFound(_) => "not_found",
            CoreError::PartialNotFound { .. } => "partial_not_found",
            CoreError::SeatConflict(_) => "seat_conflict",
            CoreError::Conflict(_) => "conflict",
            CoreError::ExternalService(_) => "external_service",
            CoreError::Payment(_) => "payment_declined",
            CoreError::ProviderUnavailable(_) => "provider_unavailable",
            CoreError::ProviderUnreachable(_) => "provider_unreachable",
            CoreError::Unsupported(_) => "unsupported",
            CoreError::Authorization(_) => "unauthorized",
            CoreError::Integrity(_) => "integrity",
            CoreError::Storage(_) => "storage",
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(CoreError::ExternalService("timeout".into()).is_retryable());
        assert!(CoreError::Storage("pool".into()).is_retryable());
        assert!(!CoreError::Conflict("A-1".into()).is_retryable());
        assert!(!CoreError::Payment("declined".into()).is_retryable());
        assert!(CoreError::ProviderUnreachable("create payment timed out".into()).is_retryable());
        assert!(!CoreError::ProviderUnavailable("cash disabled".into()).is_retryable());
    }

    #[test]
    fn test_conflict_codes_are_distinct() {
        assert_eq!(CoreError::SeatConflict("S1".into()).code(), "seat_conflict");
        assert_eq!(CoreError::Conflict("ticket 7 already used".into()).code(), "conflict");
        assert_eq!(CoreError::Payment("declined".into()).code(), "payment_declined");
        assert_eq!(CoreError::ProviderUnreachable("timeout".into()).code(), "provider_unreachable");
    }

    #[test]
    fn test_partial_not_found_message() {
        let err = CoreError::PartialNotFound { missing: vec![7, 9] };
        assert_eq!(err.to_string(), "Tickets not found: [7, 9]");
        assert_eq!(err.code(), "partial_not_found");
    }
}
