//! The single authorization checkpoint
//!
//! Every collaborator that performs a download must ask here first and do
//! nothing when `allowed` is false. An active subscription short-circuits
//! the quota entirely, so a subscriber's counter is never touched.

use chrono::{DateTime, Utc};

use crate::error::EntitlementResult;
use crate::quota::QuotaEngine;
use crate::subscription::SubscriptionEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessReason {
    Subscription,
    QuotaOk,
    QuotaExceeded,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct AccessDecision {
    pub allowed: bool,
    pub reason: AccessReason,
    /// Free downloads left today; `None` for subscribers.
    pub remaining: Option<u32>,
}

#[derive(Clone)]
pub struct AccessService {
    quota: QuotaEngine,
    subscriptions: SubscriptionEngine,
}

impl AccessService {
    pub fn new(quota: QuotaEngine, subscriptions: SubscriptionEngine) -> Self {
        Self {
            quota,
            subscriptions,
        }
    }

    /// May this user download now? Consumes one quota unit for free users
    /// when allowed; subscribers pass unconditionally.
    pub async fn can_download(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> EntitlementResult<AccessDecision> {
        if self.subscriptions.is_active(user_id, now).await? {
            return Ok(AccessDecision {
                allowed: true,
                reason: AccessReason::Subscription,
                remaining: None,
            });
        }

        let quota = self.quota.check_and_consume(user_id, now).await?;
        if quota.allowed {
            Ok(AccessDecision {
                allowed: true,
                reason: AccessReason::QuotaOk,
                remaining: Some(quota.remaining),
            })
        } else {
            Ok(AccessDecision {
                allowed: false,
                reason: AccessReason::QuotaExceeded,
                remaining: Some(0),
            })
        }
    }
}
