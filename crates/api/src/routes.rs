//! HTTP routes
//!
//! The download checkpoint returns 200 for both allowed and denied
//! decisions; exhausted quota is a business outcome, not a transport
//! error. The webhook returns 200 for duplicates too, so the payment
//! processor stops redelivering an event that is already applied.
//! Every handler retries transient store errors with backoff before
//! surfacing a 503.

use std::future::Future;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use linkvault_entitlement::{
    AccessDecision, EntitlementError, PaymentEvent, QuotaSnapshot, ReconcileOutcome,
    SubscriptionStatus,
};
use serde_json::json;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use crate::error::ApiResult;
use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/plans", get(list_plans))
        .route("/v1/access/{user_id}", post(check_access))
        .route("/v1/status/{user_id}", get(user_status))
        .route("/webhooks/payment", post(payment_webhook))
        .with_state(state)
}

/// Retry an entitlement operation on transient store errors with
/// exponential backoff. Safety of retrying each operation is the
/// entitlement layer's contract: payment application is covered by the
/// idempotency ledger, reads are harmless, and the quota consume path
/// accepts the small double-count window.
async fn with_retry<T, F, Fut>(op: F) -> Result<T, EntitlementError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, EntitlementError>>,
{
    let strategy = ExponentialBackoff::from_millis(50).map(jitter).take(3);
    RetryIf::spawn(strategy, op, EntitlementError::is_transient).await
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn list_plans(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "plans": state.entitlements.plans.all() }))
}

/// The download checkpoint. Consumes one quota unit for free users when
/// allowed; subscribers pass without touching their counter.
async fn check_access(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<AccessDecision>> {
    let decision = with_retry(|| {
        let access = state.entitlements.access.clone();
        let user_id = user_id.clone();
        async move { access.can_download(&user_id, Utc::now()).await }
    })
    .await?;
    Ok(Json(decision))
}

#[derive(serde::Serialize)]
struct UserStatus {
    user_id: String,
    subscription: SubscriptionStatus,
    quota: QuotaSnapshot,
}

async fn user_status(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<UserStatus>> {
    let (subscription, quota) = with_retry(|| {
        let entitlements = state.entitlements.clone();
        let user_id = user_id.clone();
        async move {
            let now = Utc::now();
            let subscription = entitlements.subscriptions.status(&user_id, now).await?;
            let quota = entitlements.quota.snapshot(&user_id, now).await?;
            Ok((subscription, quota))
        }
    })
    .await?;
    Ok(Json(UserStatus {
        user_id,
        subscription,
        quota,
    }))
}

/// Payment confirmation webhook.
///
/// Transient store errors are retried in-process before surfacing a 503;
/// the reconciler's ledger-first ordering makes the retry safe. Duplicate
/// deliveries acknowledge with 200 so the processor stops resending.
async fn payment_webhook(
    State(state): State<AppState>,
    Json(event): Json<PaymentEvent>,
) -> ApiResult<Json<serde_json::Value>> {
    let outcome = with_retry(|| {
        let reconciler = state.entitlements.reconciler.clone();
        let event = event.clone();
        async move { reconciler.process(&event, Utc::now()).await }
    })
    .await?;

    match outcome {
        ReconcileOutcome::Applied { new_expiry } => Ok(Json(json!({
            "status": "applied",
            "payment_id": event.payment_id,
            "expires_at": new_expiry,
        }))),
        ReconcileOutcome::AlreadyApplied => Ok(Json(json!({
            "status": "already_applied",
            "payment_id": event.payment_id,
        }))),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use chrono::{DateTime, FixedOffset};
    use linkvault_entitlement::signing::payment_signature;
    use linkvault_entitlement::{
        EntitlementConfig, EntitlementService, EntitlementStore, MemoryStore, PlanCatalog,
        QuotaOutcome, UserEntitlement,
    };
    use tower::ServiceExt;

    use super::*;

    const SECRET: &str = "test-webhook-secret";

    fn test_config(free_daily_limit: u32) -> EntitlementConfig {
        EntitlementConfig {
            free_daily_limit,
            reset_offset: FixedOffset::east_opt(0).unwrap(),
            webhook_secret: SECRET.to_string(),
            store_timeout: Duration::from_secs(5),
        }
    }

    fn test_router(free_daily_limit: u32) -> Router {
        let service = EntitlementService::in_memory(test_config(free_daily_limit), PlanCatalog::default());
        create_router(AppState::new(service))
    }

    /// Store that fails the next `failures_left` operations with a
    /// transient error, then behaves like the in-memory store.
    struct FlakyStore {
        inner: MemoryStore,
        failures_left: AtomicU32,
    }

    impl FlakyStore {
        fn new(failures: u32, daily_limit: u32) -> Self {
            Self {
                inner: MemoryStore::new(daily_limit),
                failures_left: AtomicU32::new(failures),
            }
        }

        fn trip(&self) -> Result<(), EntitlementError> {
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(EntitlementError::StoreUnavailable(
                    "injected outage".to_string(),
                ));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl EntitlementStore for FlakyStore {
        async fn get(
            &self,
            user_id: &str,
            now: DateTime<Utc>,
        ) -> Result<UserEntitlement, EntitlementError> {
            self.trip()?;
            self.inner.get(user_id, now).await
        }

        async fn save(&self, record: &UserEntitlement) -> Result<(), EntitlementError> {
            self.trip()?;
            self.inner.save(record).await
        }

        async fn mark_payment_processed(
            &self,
            user_id: &str,
            payment_id: &str,
        ) -> Result<bool, EntitlementError> {
            self.trip()?;
            self.inner.mark_payment_processed(user_id, payment_id).await
        }

        async fn consume_quota(
            &self,
            user_id: &str,
            now: DateTime<Utc>,
            offset: FixedOffset,
        ) -> Result<QuotaOutcome, EntitlementError> {
            self.trip()?;
            self.inner.consume_quota(user_id, now, offset).await
        }

        async fn extend_subscription(
            &self,
            user_id: &str,
            now: DateTime<Utc>,
            duration: chrono::Duration,
        ) -> Result<DateTime<Utc>, EntitlementError> {
            self.trip()?;
            self.inner.extend_subscription(user_id, now, duration).await
        }

        async fn reset_stale(
            &self,
            as_of: DateTime<Utc>,
            offset: FixedOffset,
        ) -> Result<u64, EntitlementError> {
            self.trip()?;
            self.inner.reset_stale(as_of, offset).await
        }
    }

    fn flaky_router(failures: u32, daily_limit: u32) -> Router {
        let store = Arc::new(FlakyStore::new(failures, daily_limit));
        let service = EntitlementService::new(test_config(daily_limit), PlanCatalog::default(), store);
        create_router(AppState::new(service))
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_empty(uri: &str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn signed_webhook_body(payment_id: &str, user_id: &str, plan_id: &str, amount: i64) -> serde_json::Value {
        let signature = payment_signature(SECRET, payment_id, user_id, plan_id, amount).unwrap();
        json!({
            "payment_id": payment_id,
            "user_id": user_id,
            "plan_id": plan_id,
            "amount": amount,
            "signature": signature,
        })
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let router = test_router(3);
        let response = router.oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn plans_lists_the_catalog() {
        let router = test_router(3);
        let response = router.oneshot(get("/v1/plans")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        let plans = body["plans"].as_array().unwrap();
        assert_eq!(plans.len(), 3);
        assert_eq!(plans[0]["id"], "monthly");
        assert_eq!(plans[0]["price_minor"], 4_900);
    }

    #[tokio::test]
    async fn access_counts_down_and_denies_with_200() {
        let router = test_router(2);

        for expected_remaining in [1, 0] {
            let response = router
                .clone()
                .oneshot(post_empty("/v1/access/u1"))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let body = body_json(response).await;
            assert_eq!(body["allowed"], true);
            assert_eq!(body["reason"], "quota_ok");
            assert_eq!(body["remaining"], expected_remaining);
        }

        // Denial is a decision, not a transport error.
        let response = router.oneshot(post_empty("/v1/access/u1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["allowed"], false);
        assert_eq!(body["reason"], "quota_exceeded");
    }

    #[tokio::test]
    async fn access_retries_transient_store_errors() {
        // Two injected outages; the backoff retries absorb them and the
        // caller still gets a decision.
        let router = flaky_router(2, 3);
        let response = router.oneshot(post_empty("/v1/access/u1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["allowed"], true);
        assert_eq!(body["reason"], "quota_ok");
    }

    #[tokio::test]
    async fn access_returns_503_when_store_stays_down() {
        let router = flaky_router(u32::MAX, 3);
        let response = router
            .clone()
            .oneshot(post_empty("/v1/access/u1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        // Status reads surface the outage the same way.
        let response = router.oneshot(get("/v1/status/u1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn webhook_applies_then_acknowledges_duplicate() {
        let router = test_router(3);
        let event = signed_webhook_body("pay_1", "u1", "monthly", 4_900);

        let response = router
            .clone()
            .oneshot(post_json("/webhooks/payment", event.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "applied");

        // Redelivery of the same event acknowledges without re-applying.
        let response = router
            .clone()
            .oneshot(post_json("/webhooks/payment", event))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "already_applied");

        // The subscriber now passes the checkpoint without quota spend.
        let response = router.oneshot(post_empty("/v1/access/u1")).await.unwrap();
        let body = body_json(response).await;
        assert_eq!(body["allowed"], true);
        assert_eq!(body["reason"], "subscription");
    }

    #[tokio::test]
    async fn webhook_rejects_bad_signature_with_401() {
        let router = test_router(3);
        let mut event = signed_webhook_body("pay_1", "u1", "monthly", 4_900);
        event["signature"] = json!("deadbeef");

        let response = router
            .clone()
            .oneshot(post_json("/webhooks/payment", event))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        // Nothing was applied.
        let response = router.oneshot(get("/v1/status/u1")).await.unwrap();
        let body = body_json(response).await;
        assert_eq!(body["subscription"]["active"], false);
    }

    #[tokio::test]
    async fn webhook_rejects_unknown_plan_with_400() {
        let router = test_router(3);
        let event = signed_webhook_body("pay_1", "u1", "lifetime", 99_900);

        let response = router
            .oneshot(post_json("/webhooks/payment", event))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn webhook_rejects_amount_mismatch_with_400() {
        let router = test_router(3);
        // Correctly signed, wrong price for the plan.
        let event = signed_webhook_body("pay_1", "u1", "monthly", 100);

        let response = router
            .oneshot(post_json("/webhooks/payment", event))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn status_reports_subscription_and_quota() {
        let router = test_router(3);

        router
            .clone()
            .oneshot(post_empty("/v1/access/u1"))
            .await
            .unwrap();
        router
            .clone()
            .oneshot(post_json(
                "/webhooks/payment",
                signed_webhook_body("pay_1", "u1", "monthly", 4_900),
            ))
            .await
            .unwrap();

        let response = router.oneshot(get("/v1/status/u1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["user_id"], "u1");
        assert_eq!(body["subscription"]["active"], true);
        assert_eq!(body["quota"]["daily_used"], 1);
        assert_eq!(body["quota"]["daily_limit"], 3);
        assert_eq!(body["quota"]["remaining"], 2);
    }
}
