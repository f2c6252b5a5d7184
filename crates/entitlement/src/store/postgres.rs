//! Postgres-backed entitlement store
//!
//! Atomicity discipline:
//! - the payment ledger is claimed with `INSERT ... ON CONFLICT DO NOTHING`,
//!   so exactly one of any number of concurrent duplicate deliveries sees a
//!   row inserted;
//! - quota consumption is a conditional
//!   `UPDATE ... WHERE daily_used < daily_limit ... RETURNING`, so the last
//!   slot cannot be spent twice;
//! - subscription extension computes the stacking base inside the UPDATE
//!   (`GREATEST(COALESCE(expiry, now), now)`), so concurrent purchases both
//!   extend rather than overwrite each other.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use sqlx::PgPool;

use super::{EntitlementStore, QuotaOutcome};
use crate::error::{EntitlementError, EntitlementResult};
use crate::model::{quota_boundary, UserEntitlement};

pub struct PgStore {
    pool: PgPool,
    default_daily_limit: u32,
}

impl PgStore {
    pub fn new(pool: PgPool, default_daily_limit: u32) -> Self {
        Self {
            pool,
            default_daily_limit,
        }
    }

    /// Create the default record on first interaction, leaving an existing
    /// one untouched.
    async fn ensure_record(&self, user_id: &str, now: DateTime<Utc>) -> EntitlementResult<()> {
        sqlx::query(
            r#"
            INSERT INTO user_entitlements
                (user_id, daily_used, daily_limit, last_reset_at, created_at, last_active_at)
            VALUES ($1, 0, $2, $3, $3, $3)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(self.default_daily_limit as i32)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl EntitlementStore for PgStore {
    async fn get(&self, user_id: &str, now: DateTime<Utc>) -> EntitlementResult<UserEntitlement> {
        self.ensure_record(user_id, now).await?;

        let row: (i32, i32, DateTime<Utc>, Option<DateTime<Utc>>, DateTime<Utc>, DateTime<Utc>) =
            sqlx::query_as(
                r#"
                SELECT daily_used, daily_limit, last_reset_at, subscription_expires_at,
                       created_at, last_active_at
                FROM user_entitlements
                WHERE user_id = $1
                "#,
            )
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;

        let payment_ids: Vec<(String,)> =
            sqlx::query_as("SELECT payment_id FROM processed_payments WHERE user_id = $1")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;

        Ok(UserEntitlement {
            user_id: user_id.to_string(),
            daily_used: u32::try_from(row.0).unwrap_or(0),
            daily_limit: u32::try_from(row.1).unwrap_or(0),
            last_reset_at: row.2,
            subscription_expires_at: row.3,
            processed_payment_ids: payment_ids.into_iter().map(|(id,)| id).collect(),
            created_at: row.4,
            last_active_at: row.5,
        })
    }

    async fn save(&self, record: &UserEntitlement) -> EntitlementResult<()> {
        sqlx::query(
            r#"
            INSERT INTO user_entitlements
                (user_id, daily_used, daily_limit, last_reset_at, subscription_expires_at,
                 created_at, last_active_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (user_id) DO UPDATE SET
                daily_used = EXCLUDED.daily_used,
                daily_limit = EXCLUDED.daily_limit,
                last_reset_at = EXCLUDED.last_reset_at,
                subscription_expires_at = EXCLUDED.subscription_expires_at,
                last_active_at = EXCLUDED.last_active_at
            "#,
        )
        .bind(&record.user_id)
        .bind(record.daily_used as i32)
        .bind(record.daily_limit as i32)
        .bind(record.last_reset_at)
        .bind(record.subscription_expires_at)
        .bind(record.created_at)
        .bind(record.last_active_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_payment_processed(
        &self,
        user_id: &str,
        payment_id: &str,
    ) -> EntitlementResult<bool> {
        self.ensure_record(user_id, Utc::now()).await?;

        let result = sqlx::query(
            r#"
            INSERT INTO processed_payments (payment_id, user_id, processed_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (payment_id) DO NOTHING
            "#,
        )
        .bind(payment_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn consume_quota(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        offset: FixedOffset,
    ) -> EntitlementResult<QuotaOutcome> {
        self.ensure_record(user_id, now).await?;
        let boundary = quota_boundary(now, offset);

        // Reset a stale counter first. Both statements are individually
        // atomic; the conditional increment below is what prevents
        // double-spend of the last slot.
        sqlx::query(
            r#"
            UPDATE user_entitlements
            SET daily_used = 0, last_reset_at = $2
            WHERE user_id = $1 AND last_reset_at < $3
            "#,
        )
        .bind(user_id)
        .bind(now)
        .bind(boundary)
        .execute(&self.pool)
        .await?;

        let row: Option<(i32, i32)> = sqlx::query_as(
            r#"
            UPDATE user_entitlements
            SET daily_used = daily_used + 1, last_active_at = $2
            WHERE user_id = $1 AND daily_used < daily_limit
            RETURNING daily_used, daily_limit
            "#,
        )
        .bind(user_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((used, limit)) => Ok(QuotaOutcome::Consumed {
                remaining: u32::try_from(limit - used).unwrap_or(0),
            }),
            None => Ok(QuotaOutcome::Exhausted),
        }
    }

    async fn extend_subscription(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        duration: chrono::Duration,
    ) -> EntitlementResult<DateTime<Utc>> {
        self.ensure_record(user_id, now).await?;

        let row: (Option<DateTime<Utc>>,) = sqlx::query_as(
            r#"
            UPDATE user_entitlements
            SET subscription_expires_at =
                    GREATEST(COALESCE(subscription_expires_at, $2), $2)
                    + $3 * INTERVAL '1 second',
                last_active_at = $2
            WHERE user_id = $1
            RETURNING subscription_expires_at
            "#,
        )
        .bind(user_id)
        .bind(now)
        .bind(duration.num_seconds())
        .fetch_one(&self.pool)
        .await?;

        row.0.ok_or_else(|| {
            EntitlementError::Store("subscription extension returned no expiry".to_string())
        })
    }

    async fn reset_stale(
        &self,
        as_of: DateTime<Utc>,
        offset: FixedOffset,
    ) -> EntitlementResult<u64> {
        let boundary = quota_boundary(as_of, offset);
        let result = sqlx::query(
            r#"
            UPDATE user_entitlements
            SET daily_used = 0, last_reset_at = $1
            WHERE last_reset_at < $2
            "#,
        )
        .bind(as_of)
        .bind(boundary)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
