//! Entitlement error types
//!
//! Validation and verification failures are terminal for the event that
//! caused them. `StoreUnavailable` is transient and safe to retry with
//! backoff; everything else is not.

use thiserror::Error;

pub type EntitlementResult<T> = Result<T, EntitlementError>;

#[derive(Debug, Error)]
pub enum EntitlementError {
    /// Malformed payment event (missing or empty required field).
    #[error("invalid payment event: {0}")]
    Validation(String),

    /// The event references a plan the catalog does not know.
    #[error("unknown plan: {0}")]
    UnknownPlan(String),

    /// The paid amount does not match the catalog price for the plan.
    #[error("amount mismatch for plan {plan_id}: expected {expected}, got {received}")]
    AmountMismatch {
        plan_id: String,
        expected: i64,
        received: i64,
    },

    /// Signature verification failed. Surfaced to operators as a potential
    /// fraud signal; the event is never applied.
    #[error("payment signature verification failed")]
    SignatureMismatch,

    /// Timeout or temporary unavailability of the entitlement store.
    #[error("entitlement store unavailable: {0}")]
    StoreUnavailable(String),

    /// Non-transient store failure.
    #[error("entitlement store error: {0}")]
    Store(String),

    /// Missing or unparseable configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl EntitlementError {
    /// Transient errors may be retried by the caller with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }

    /// Validation-class failures: reject the event, no mutation.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::UnknownPlan(_) | Self::AmountMismatch { .. }
        )
    }
}

impl From<sqlx::Error> for EntitlementError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
                Self::StoreUnavailable(e.to_string())
            }
            other => Self::Store(other.to_string()),
        }
    }
}
