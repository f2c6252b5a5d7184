//! Entitlement storage
//!
//! The store is the only shared mutable resource in the system. All
//! mutation paths go through it, and it owns the per-user atomicity that
//! the engines rely on: two concurrent `consume_quota` calls for the same
//! user must not both succeed on the last slot, and exactly one of any
//! number of concurrent `mark_payment_processed` calls for a payment id
//! may return `true`.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};

use crate::error::{EntitlementError, EntitlementResult};
use crate::model::UserEntitlement;

/// Outcome of an atomic quota consumption attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaOutcome {
    /// One unit consumed; `remaining` slots left after the increment.
    Consumed { remaining: u32 },
    /// The daily limit was already reached; nothing was written.
    Exhausted,
}

#[async_trait]
pub trait EntitlementStore: Send + Sync {
    /// Fetch the record for `user_id`, creating and persisting a default
    /// one on first interaction.
    async fn get(&self, user_id: &str, now: DateTime<Utc>) -> EntitlementResult<UserEntitlement>;

    /// Full-record upsert. The processed-payment ledger is not written
    /// through this path; it only changes via `mark_payment_processed`.
    async fn save(&self, record: &UserEntitlement) -> EntitlementResult<()>;

    /// Record `payment_id` in the idempotency ledger. Returns `false` when
    /// the id was already present. Atomic across concurrent duplicate
    /// submissions of the same id.
    async fn mark_payment_processed(
        &self,
        user_id: &str,
        payment_id: &str,
    ) -> EntitlementResult<bool>;

    /// Atomically reset a stale counter and consume one quota unit if the
    /// daily limit allows. No write happens when the limit is reached.
    async fn consume_quota(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        offset: FixedOffset,
    ) -> EntitlementResult<QuotaOutcome>;

    /// Stacking subscription extension: the new expiry is
    /// `max(now, current expiry) + duration`, so renewing early never
    /// discards remaining time.
    async fn extend_subscription(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        duration: chrono::Duration,
    ) -> EntitlementResult<DateTime<Utc>>;

    /// Reset `daily_used` for every record whose last reset precedes the
    /// current quota boundary, stamping `last_reset_at = as_of`. Returns
    /// the number of records reset; a second invocation for the same
    /// boundary touches nothing.
    async fn reset_stale(
        &self,
        as_of: DateTime<Utc>,
        offset: FixedOffset,
    ) -> EntitlementResult<u64>;
}

/// Bound a store operation by the configured timeout. Timeouts surface as
/// transient `StoreUnavailable` errors so callers can retry with backoff
/// instead of hanging a request thread.
pub(crate) async fn bounded<T>(
    timeout: Duration,
    op: impl Future<Output = EntitlementResult<T>> + Send,
) -> EntitlementResult<T> {
    match tokio::time::timeout(timeout, op).await {
        Ok(result) => result,
        Err(_) => Err(EntitlementError::StoreUnavailable(format!(
            "store operation timed out after {timeout:?}"
        ))),
    }
}
