//! In-memory entitlement store
//!
//! Backs tests and self-hosted trial deployments. DashMap entry guards
//! serialize all mutations for a single user, which is what gives
//! `consume_quota`, `extend_subscription`, and `mark_payment_processed`
//! their per-user atomicity. Guards are never held across an await point.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use dashmap::DashMap;

use super::{EntitlementStore, QuotaOutcome};
use crate::error::EntitlementResult;
use crate::model::{quota_boundary, UserEntitlement};

pub struct MemoryStore {
    users: DashMap<String, UserEntitlement>,
    default_daily_limit: u32,
}

impl MemoryStore {
    pub fn new(default_daily_limit: u32) -> Self {
        Self {
            users: DashMap::new(),
            default_daily_limit,
        }
    }
}

#[async_trait]
impl EntitlementStore for MemoryStore {
    async fn get(&self, user_id: &str, now: DateTime<Utc>) -> EntitlementResult<UserEntitlement> {
        let record = self
            .users
            .entry(user_id.to_string())
            .or_insert_with(|| UserEntitlement::new(user_id, self.default_daily_limit, now))
            .clone();
        Ok(record)
    }

    async fn save(&self, record: &UserEntitlement) -> EntitlementResult<()> {
        self.users.insert(record.user_id.clone(), record.clone());
        Ok(())
    }

    async fn mark_payment_processed(
        &self,
        user_id: &str,
        payment_id: &str,
    ) -> EntitlementResult<bool> {
        let mut entry = self
            .users
            .entry(user_id.to_string())
            .or_insert_with(|| UserEntitlement::new(user_id, self.default_daily_limit, Utc::now()));
        Ok(entry.processed_payment_ids.insert(payment_id.to_string()))
    }

    async fn consume_quota(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        offset: FixedOffset,
    ) -> EntitlementResult<QuotaOutcome> {
        let boundary = quota_boundary(now, offset);
        let mut entry = self
            .users
            .entry(user_id.to_string())
            .or_insert_with(|| UserEntitlement::new(user_id, self.default_daily_limit, now));

        if entry.last_reset_at < boundary {
            entry.daily_used = 0;
            entry.last_reset_at = now;
        }

        if entry.daily_used < entry.daily_limit {
            entry.daily_used += 1;
            entry.last_active_at = now;
            let remaining = entry.remaining();
            Ok(QuotaOutcome::Consumed { remaining })
        } else {
            Ok(QuotaOutcome::Exhausted)
        }
    }

    async fn extend_subscription(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        duration: chrono::Duration,
    ) -> EntitlementResult<DateTime<Utc>> {
        let mut entry = self
            .users
            .entry(user_id.to_string())
            .or_insert_with(|| UserEntitlement::new(user_id, self.default_daily_limit, now));

        let base = entry
            .subscription_expires_at
            .filter(|expiry| *expiry > now)
            .unwrap_or(now);
        let new_expiry = base + duration;
        entry.subscription_expires_at = Some(new_expiry);
        entry.last_active_at = now;
        Ok(new_expiry)
    }

    async fn reset_stale(
        &self,
        as_of: DateTime<Utc>,
        offset: FixedOffset,
    ) -> EntitlementResult<u64> {
        let boundary = quota_boundary(as_of, offset);
        let mut reset = 0u64;
        for mut entry in self.users.iter_mut() {
            if entry.last_reset_at < boundary {
                entry.daily_used = 0;
                entry.last_reset_at = as_of;
                reset += 1;
            }
        }
        Ok(reset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn get_creates_a_default_record_once() {
        let store = MemoryStore::new(3);
        let now = Utc::now();

        let record = store.get("u1", now).await.unwrap();
        assert_eq!(record.daily_used, 0);
        assert_eq!(record.daily_limit, 3);
        assert_eq!(record.subscription_expires_at, None);

        // A later get sees accumulated state, not a fresh default.
        let offset = FixedOffset::east_opt(0).unwrap();
        store.consume_quota("u1", now, offset).await.unwrap();
        let again = store.get("u1", now).await.unwrap();
        assert_eq!(again.daily_used, 1);
    }

    #[tokio::test]
    async fn save_roundtrips_a_mutated_record() {
        let store = MemoryStore::new(3);
        let now = Utc::now();

        let mut record = store.get("u1", now).await.unwrap();
        record.daily_limit = 10;
        record.subscription_expires_at = Some(now + Duration::days(7));
        store.save(&record).await.unwrap();

        let loaded = store.get("u1", now).await.unwrap();
        assert_eq!(loaded.daily_limit, 10);
        assert_eq!(loaded.subscription_expires_at, Some(now + Duration::days(7)));
    }

    #[tokio::test]
    async fn mark_payment_processed_reports_duplicates() {
        let store = MemoryStore::new(3);
        assert!(store.mark_payment_processed("u1", "pay_1").await.unwrap());
        assert!(!store.mark_payment_processed("u1", "pay_1").await.unwrap());
        assert!(store.mark_payment_processed("u1", "pay_2").await.unwrap());
    }
}
