//! Subscription lifecycle
//!
//! Expiry is the single source of truth: a subscription is active iff the
//! stored expiry lies in the future. Purchases stack: renewing before
//! expiry extends from the existing expiry, not from "now", so early
//! renewal never loses paid-for time.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::EntitlementResult;
use crate::plans::Plan;
use crate::store::{bounded, EntitlementStore};

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct SubscriptionStatus {
    pub active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    /// Whole days left on an active subscription.
    pub remaining_days: Option<i64>,
}

#[derive(Clone)]
pub struct SubscriptionEngine {
    store: Arc<dyn EntitlementStore>,
    store_timeout: Duration,
}

impl SubscriptionEngine {
    pub fn new(store: Arc<dyn EntitlementStore>, store_timeout: Duration) -> Self {
        Self {
            store,
            store_timeout,
        }
    }

    pub async fn is_active(&self, user_id: &str, now: DateTime<Utc>) -> EntitlementResult<bool> {
        let record = bounded(self.store_timeout, self.store.get(user_id, now)).await?;
        Ok(record.has_active_subscription(now))
    }

    /// Apply a confirmed plan purchase, extending from
    /// `max(now, current expiry)`.
    pub async fn apply_purchase(
        &self,
        user_id: &str,
        plan: &Plan,
        now: DateTime<Utc>,
    ) -> EntitlementResult<DateTime<Utc>> {
        let new_expiry = bounded(
            self.store_timeout,
            self.store.extend_subscription(user_id, now, plan.duration()),
        )
        .await?;
        tracing::info!(
            user_id = %user_id,
            plan_id = %plan.id,
            new_expiry = %new_expiry,
            "subscription extended"
        );
        Ok(new_expiry)
    }

    pub async fn status(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> EntitlementResult<SubscriptionStatus> {
        let record = bounded(self.store_timeout, self.store.get(user_id, now)).await?;
        let active = record.has_active_subscription(now);
        let remaining_days = record
            .subscription_expires_at
            .filter(|_| active)
            .map(|expiry| (expiry - now).num_days());
        Ok(SubscriptionStatus {
            active,
            expires_at: record.subscription_expires_at,
            remaining_days,
        })
    }
}
