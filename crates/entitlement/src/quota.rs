//! Free-tier quota enforcement
//!
//! The reset boundary is a fixed local midnight in the configured reference
//! offset, not "24 hours since last use"; a fixed boundary cannot be gamed
//! by timing downloads around a rolling window. Staleness is decided by
//! [`crate::model::quota_boundary`], which both `check_and_consume` and
//! `reset_all` share.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};

use crate::error::EntitlementResult;
use crate::store::{bounded, EntitlementStore, QuotaOutcome};

/// Result of a quota check for one download attempt.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct QuotaDecision {
    pub allowed: bool,
    pub remaining: u32,
}

/// Read-only view of a user's quota for status display. Applies the
/// boundary logic without consuming anything.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct QuotaSnapshot {
    pub daily_used: u32,
    pub daily_limit: u32,
    pub remaining: u32,
}

#[derive(Clone)]
pub struct QuotaEngine {
    store: Arc<dyn EntitlementStore>,
    offset: FixedOffset,
    store_timeout: Duration,
}

impl QuotaEngine {
    pub fn new(store: Arc<dyn EntitlementStore>, offset: FixedOffset, store_timeout: Duration) -> Self {
        Self {
            store,
            offset,
            store_timeout,
        }
    }

    /// Consume one free download if the daily limit allows.
    ///
    /// A counter last reset before today's boundary is zeroed first, so a
    /// user who exhausted yesterday's quota gets today's without waiting
    /// for the scheduled reset. Returns `allowed = false` with no mutation
    /// once the limit is reached.
    pub async fn check_and_consume(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> EntitlementResult<QuotaDecision> {
        let outcome = bounded(
            self.store_timeout,
            self.store.consume_quota(user_id, now, self.offset),
        )
        .await?;

        match outcome {
            QuotaOutcome::Consumed { remaining } => {
                tracing::debug!(user_id = %user_id, remaining = remaining, "quota unit consumed");
                Ok(QuotaDecision {
                    allowed: true,
                    remaining,
                })
            }
            QuotaOutcome::Exhausted => {
                tracing::debug!(user_id = %user_id, "daily quota exhausted");
                Ok(QuotaDecision {
                    allowed: false,
                    remaining: 0,
                })
            }
        }
    }

    /// Scheduler entry point: reset every record whose last reset precedes
    /// the current boundary. Idempotent per boundary: records already
    /// stamped at or after it are left untouched.
    pub async fn reset_all(&self, as_of: DateTime<Utc>) -> EntitlementResult<u64> {
        let reset = bounded(self.store_timeout, self.store.reset_stale(as_of, self.offset)).await?;
        tracing::info!(users_reset = reset, as_of = %as_of, "daily quota reset complete");
        Ok(reset)
    }

    /// Quota numbers for status display, with the boundary applied but
    /// nothing consumed or written.
    pub async fn snapshot(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> EntitlementResult<QuotaSnapshot> {
        let record = bounded(self.store_timeout, self.store.get(user_id, now)).await?;
        let boundary = crate::model::quota_boundary(now, self.offset);
        let daily_used = if record.last_reset_at < boundary {
            0
        } else {
            record.daily_used
        };
        Ok(QuotaSnapshot {
            daily_used,
            daily_limit: record.daily_limit,
            remaining: record.daily_limit.saturating_sub(daily_used),
        })
    }
}
