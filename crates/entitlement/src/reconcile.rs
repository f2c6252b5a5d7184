//! Payment confirmation reconciliation
//!
//! Each confirmation event moves through Received → Verified → Applied, or
//! terminates at Rejected when validation or signature verification fails.
//! The processed-payment ledger guarantees exactly-once application:
//! duplicate deliveries are normal at-least-once webhook behavior and
//! resolve to an idempotent no-op, never an error.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::{EntitlementError, EntitlementResult};
use crate::plans::{Plan, PlanCatalog};
use crate::signing::verify_payment_signature;
use crate::store::{bounded, EntitlementStore};
use crate::subscription::SubscriptionEngine;

/// Typed payment confirmation, parsed from webhook JSON before any
/// business logic runs.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PaymentEvent {
    /// Unique per transaction at the payment processor.
    pub payment_id: String,
    pub user_id: String,
    pub plan_id: String,
    /// Paid amount in minor currency units; must match the catalog price.
    pub amount: i64,
    /// Hex HMAC-SHA256 over `payment_id|user_id|plan_id|amount`.
    pub signature: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// First application of this payment; subscription extended.
    Applied { new_expiry: DateTime<Utc> },
    /// The payment id was already in the ledger; nothing changed.
    AlreadyApplied,
}

#[derive(Clone)]
pub struct PaymentReconciler {
    store: Arc<dyn EntitlementStore>,
    subscriptions: SubscriptionEngine,
    catalog: PlanCatalog,
    webhook_secret: String,
    store_timeout: Duration,
}

impl PaymentReconciler {
    pub fn new(
        store: Arc<dyn EntitlementStore>,
        subscriptions: SubscriptionEngine,
        catalog: PlanCatalog,
        webhook_secret: String,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            subscriptions,
            catalog,
            webhook_secret,
            store_timeout,
        }
    }

    /// Reconcile one confirmation event into at most one subscription
    /// extension.
    ///
    /// Order matters: the ledger claim happens before the extension, so a
    /// concurrent duplicate can never apply twice. A transient store error
    /// at any step propagates to the caller, whose retry is safe: either
    /// the claim never committed (retry applies normally) or it did (retry
    /// resolves to `AlreadyApplied`).
    pub async fn process(
        &self,
        event: &PaymentEvent,
        now: DateTime<Utc>,
    ) -> EntitlementResult<ReconcileOutcome> {
        let plan = self.validate(event)?;

        if self.webhook_secret.is_empty() {
            tracing::error!(
                payment_id = %event.payment_id,
                "payment webhook secret not configured - rejecting event"
            );
            return Err(EntitlementError::Config(
                "payment webhook secret not configured".to_string(),
            ));
        }

        if !verify_payment_signature(
            &self.webhook_secret,
            &event.payment_id,
            &event.user_id,
            &event.plan_id,
            event.amount,
            &event.signature,
        ) {
            tracing::error!(
                payment_id = %event.payment_id,
                user_id = %event.user_id,
                "payment signature mismatch - rejecting event"
            );
            return Err(EntitlementError::SignatureMismatch);
        }

        let first_application = bounded(
            self.store_timeout,
            self.store
                .mark_payment_processed(&event.user_id, &event.payment_id),
        )
        .await?;

        if !first_application {
            tracing::info!(
                payment_id = %event.payment_id,
                user_id = %event.user_id,
                "duplicate payment delivery - already applied"
            );
            return Ok(ReconcileOutcome::AlreadyApplied);
        }

        let new_expiry = self
            .subscriptions
            .apply_purchase(&event.user_id, plan, now)
            .await?;

        tracing::info!(
            payment_id = %event.payment_id,
            user_id = %event.user_id,
            plan_id = %plan.id,
            new_expiry = %new_expiry,
            "payment applied"
        );

        Ok(ReconcileOutcome::Applied { new_expiry })
    }

    /// Required-field and catalog checks, before any store access.
    fn validate(&self, event: &PaymentEvent) -> EntitlementResult<&Plan> {
        if event.payment_id.is_empty() {
            return Err(EntitlementError::Validation("payment_id is empty".to_string()));
        }
        if event.user_id.is_empty() {
            return Err(EntitlementError::Validation("user_id is empty".to_string()));
        }
        if event.signature.is_empty() {
            return Err(EntitlementError::Validation("signature is empty".to_string()));
        }

        let plan = self
            .catalog
            .get(&event.plan_id)
            .ok_or_else(|| EntitlementError::UnknownPlan(event.plan_id.clone()))?;

        if event.amount != plan.price_minor {
            return Err(EntitlementError::AmountMismatch {
                plan_id: plan.id.clone(),
                expected: plan.price_minor,
                received: event.amount,
            });
        }

        Ok(plan)
    }
}
