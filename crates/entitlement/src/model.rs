//! Per-user entitlement records

use std::collections::HashSet;

use chrono::{DateTime, FixedOffset, NaiveTime, Utc};

/// Durable entitlement state for one user.
///
/// Created on first interaction with a zeroed counter, the configured free
/// limit, and no subscription. Mutated only through the entitlement store's
/// atomic operations; never deleted by this core.
#[derive(Debug, Clone, serde::Serialize)]
pub struct UserEntitlement {
    /// Opaque stable identifier from the chat platform.
    pub user_id: String,
    /// Downloads consumed since the last reset.
    pub daily_used: u32,
    /// Free-tier cap. Stored per record so a future tier can vary it
    /// without touching the engines.
    pub daily_limit: u32,
    /// Last quota reset applied to this record; monotonically
    /// non-decreasing.
    pub last_reset_at: DateTime<Utc>,
    /// Absent or past means no active subscription.
    pub subscription_expires_at: Option<DateTime<Utc>>,
    /// Idempotency ledger of applied payment ids.
    #[serde(skip)]
    pub processed_payment_ids: HashSet<String>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

impl UserEntitlement {
    pub fn new(user_id: &str, daily_limit: u32, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            daily_used: 0,
            daily_limit,
            last_reset_at: now,
            subscription_expires_at: None,
            processed_payment_ids: HashSet::new(),
            created_at: now,
            last_active_at: now,
        }
    }

    /// Free downloads left today, never negative.
    pub fn remaining(&self) -> u32 {
        self.daily_limit.saturating_sub(self.daily_used)
    }

    pub fn has_active_subscription(&self, now: DateTime<Utc>) -> bool {
        self.subscription_expires_at.is_some_and(|expiry| now < expiry)
    }
}

/// The current quota boundary: the UTC instant of the most recent local
/// midnight in the reference offset.
///
/// A record is stale (due for a reset) exactly when its `last_reset_at`
/// precedes this instant, which is the same thing as its calendar date in
/// the reference offset being earlier than today's. Both `check_and_consume`
/// and `reset_all` go through this one definition; nothing in the crate
/// compares raw timestamp differences.
pub fn quota_boundary(now: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
    let local_midnight = now.with_timezone(&offset).date_naive().and_time(NaiveTime::MIN);
    let utc_naive = local_midnight - chrono::Duration::seconds(i64::from(offset.local_minus_utc()));
    DateTime::from_naive_utc_and_offset(utc_naive, Utc)
}
