//! Error taxonomy for the payment & commission engine.
//!
//! Every variant maps to exactly one HTTP status per spec.md §7; that
//! mapping lives in `server`'s `IntoResponse` impl rather than here, so this
//! module stays transport-agnostic and reusable from the reconciler and
//! other background tasks.

use thiserror::Error;

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Caller input is malformed.
    #[error("validation error: {0}")]
    Validation(String),

    /// Missing or invalid auth token.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Role/ownership check failed.
    #[error("not authorized: {0}")]
    Authorization(String),

    /// Requested entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// `transactionId` already exists (`ledger::append`).
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// Requested status transition is not in the allowed set, or the record is terminal.
    #[error("illegal transition: {0}")]
    IllegalTransition(String),

    /// A debit would take `balance` or `usdBalance` negative.
    #[error("insufficient funds")]
    InsufficientFunds,

    /// Daily withdrawal cap or count exceeded.
    #[error("daily withdrawal limit exceeded")]
    DailyLimitExceeded,

    /// User already has a non-terminal withdrawal/conversion/activation transfer.
    #[error("a pending transaction already blocks this operation")]
    PendingBlockingTransaction,

    /// Upstream provider declined the request.
    #[error("provider error: {0}")]
    ProviderError(String),

    /// Upstream provider is unreachable or disabled; retries were exhausted or the feature is flagged off.
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// HTTP transport failure talking to a provider or sibling service.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON (de)serialization failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// JWT decode/verify failure.
    #[error("token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    /// Unexpected internal failure; full context is logged, message is generic externally.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// Whether this error represents a transient condition worth retrying
    /// (used by `gateways`' backoff loop to decide whether to give up early).
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Http(_) | EngineError::ProviderUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_are_human_readable() {
        assert_eq!(
            EngineError::Validation("amount must be positive".into()).to_string(),
            "validation error: amount must be positive"
        );
        assert_eq!(
            EngineError::IllegalTransition("completed -> processing".into()).to_string(),
            "illegal transition: completed -> processing"
        );
    }

    #[test]
    fn insufficient_funds_is_not_retryable() {
        assert!(!EngineError::InsufficientFunds.is_retryable());
        assert!(!EngineError::DailyLimitExceeded.is_retryable());
    }

    #[test]
    fn provider_unavailable_is_retryable() {
        assert!(EngineError::ProviderUnavailable("down".into()).is_retryable());
    }
}
