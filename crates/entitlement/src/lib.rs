// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! LinkVault Entitlement Core
//!
//! The entitlement state machine gating the download feature:
//!
//! - **Quota Engine**: free-tier daily counters with a fixed local-midnight
//!   reset boundary
//! - **Subscription Engine**: time-boxed premium access with stacking
//!   renewals
//! - **Payment Reconciler**: exactly-once application of payment-processor
//!   confirmations via the idempotency ledger
//! - **Access Decision**: the single "may this user download now?"
//!   checkpoint
//! - **Entitlement Store**: the only shared mutable resource; owns per-user
//!   atomicity (Postgres in production, in-memory for tests and trials)

pub mod access;
pub mod config;
pub mod error;
pub mod model;
pub mod plans;
pub mod quota;
pub mod reconcile;
pub mod signing;
pub mod store;
pub mod subscription;


// Access
pub use access::{AccessDecision, AccessReason, AccessService};

// Config
pub use config::{parse_utc_offset, EntitlementConfig};

// Error
pub use error::{EntitlementError, EntitlementResult};

// Model
pub use model::{quota_boundary, UserEntitlement};

// Plans
pub use plans::{Plan, PlanCatalog};

// Quota
pub use quota::{QuotaDecision, QuotaEngine, QuotaSnapshot};

// Reconcile
pub use reconcile::{PaymentEvent, PaymentReconciler, ReconcileOutcome};

// Store
pub use store::{EntitlementStore, MemoryStore, PgStore, QuotaOutcome};

// Subscription
pub use subscription::{SubscriptionEngine, SubscriptionStatus};

use std::sync::Arc;

use sqlx::PgPool;

/// Main entitlement service combining the engines behind one handle.
#[derive(Clone)]
pub struct EntitlementService {
    pub access: AccessService,
    pub quota: QuotaEngine,
    pub subscriptions: SubscriptionEngine,
    pub reconciler: PaymentReconciler,
    pub plans: PlanCatalog,
    pub config: EntitlementConfig,
}

impl EntitlementService {
    pub fn new(
        config: EntitlementConfig,
        catalog: PlanCatalog,
        store: Arc<dyn EntitlementStore>,
    ) -> Self {
        let quota = QuotaEngine::new(store.clone(), config.reset_offset, config.store_timeout);
        let subscriptions = SubscriptionEngine::new(store.clone(), config.store_timeout);
        let reconciler = PaymentReconciler::new(
            store,
            subscriptions.clone(),
            catalog.clone(),
            config.webhook_secret.clone(),
            config.store_timeout,
        );
        let access = AccessService::new(quota.clone(), subscriptions.clone());

        Self {
            access,
            quota,
            subscriptions,
            reconciler,
            plans: catalog,
            config,
        }
    }

    /// Production wiring: configuration from the environment, records in
    /// Postgres.
    pub fn from_env(pool: PgPool) -> EntitlementResult<Self> {
        let config = EntitlementConfig::from_env()?;
        let catalog = PlanCatalog::from_env()?;
        let store = Arc::new(PgStore::new(pool, config.free_daily_limit));
        Ok(Self::new(config, catalog, store))
    }

    /// In-memory wiring for tests and self-hosted trials.
    pub fn in_memory(config: EntitlementConfig, catalog: PlanCatalog) -> Self {
        let store = Arc::new(MemoryStore::new(config.free_daily_limit));
        Self::new(config, catalog, store)
    }
}
