//! LinkVault Background Worker
//!
//! Handles scheduled jobs:
//! - Daily quota reset at local midnight in the configured reference offset
//! - Health check heartbeat (every 5 minutes)
//!
//! A catch-up reset also runs at startup, so a worker that was down when
//! the boundary passed still zeroes stale counters promptly. Both the
//! scheduled and catch-up paths are idempotent per boundary: records
//! already reset for the current day are left untouched.

use std::time::Duration;

use chrono::{FixedOffset, Utc};
use linkvault_entitlement::EntitlementService;
use sqlx::postgres::PgPoolOptions;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

/// Create a database connection pool
async fn create_db_pool() -> anyhow::Result<sqlx::PgPool> {
    #[allow(clippy::expect_used)] // Fail-fast on startup if required config is missing
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&database_url)
        .await?;

    info!("Database pool created");
    Ok(pool)
}

/// Cron expression for the daily reset: local midnight in the reference
/// offset, expressed in the scheduler's UTC clock.
fn reset_cron(offset: FixedOffset) -> String {
    let offset_secs = i64::from(offset.local_minus_utc());
    let utc_secs = (86_400 - offset_secs.rem_euclid(86_400)) % 86_400;
    let hour = utc_secs / 3_600;
    let minute = (utc_secs % 3_600) / 60;
    format!("0 {minute} {hour} * * *")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    info!("Starting LinkVault Worker");

    // Create database pool
    let pool = create_db_pool().await?;

    // Create entitlement service
    let entitlements = match EntitlementService::from_env(pool) {
        Ok(service) => service,
        Err(e) => {
            // Misconfigured entitlement settings: keep the process alive so
            // the deployment surfaces the problem in logs instead of crash-looping
            warn!(error = %e, "Failed to create entitlement service - running in minimal mode");

            loop {
                tokio::time::sleep(Duration::from_secs(60)).await;
                info!("Worker heartbeat (minimal mode)");
            }
        }
    };

    // Catch-up reset for any boundary that passed while the worker was down
    match entitlements.quota.reset_all(Utc::now()).await {
        Ok(count) => info!(users_reset = count, "Startup catch-up quota reset complete"),
        Err(e) => error!(error = %e, "Startup catch-up quota reset failed"),
    }

    // Create scheduler
    let scheduler = JobScheduler::new().await?;

    // Job 1: Daily quota reset at the configured local midnight
    let cron = reset_cron(entitlements.config.reset_offset);
    let reset_quota = entitlements.quota.clone();
    scheduler
        .add(Job::new_async(cron.as_str(), move |_uuid, _l| {
            let quota = reset_quota.clone();
            Box::pin(async move {
                info!("Running scheduled daily quota reset");
                match quota.reset_all(Utc::now()).await {
                    Ok(count) => info!(users_reset = count, "Daily quota reset complete"),
                    Err(e) => error!(error = %e, "Daily quota reset failed"),
                }
            })
        })?)
        .await?;
    info!(cron = %cron, "Scheduled: Daily quota reset");

    // Job 2: Health check heartbeat (every 5 minutes)
    scheduler
        .add(Job::new_async("0 */5 * * * *", |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat - all systems operational");
            })
        })?)
        .await?;
    info!("Scheduled: Health check heartbeat (every 5 minutes)");

    // Start the scheduler
    info!("Starting job scheduler");
    scheduler.start().await?;

    info!("LinkVault Worker started successfully with 2 scheduled jobs");

    // Keep the main task running
    // The scheduler runs jobs in background tasks
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn reset_cron_for_utc_is_midnight() {
        let offset = FixedOffset::east_opt(0).unwrap();
        assert_eq!(reset_cron(offset), "0 0 0 * * *");
    }

    #[test]
    fn reset_cron_for_positive_offset_fires_the_evening_before() {
        // +05:30 local midnight is 18:30 UTC the previous day
        let offset = FixedOffset::east_opt(5 * 3600 + 30 * 60).unwrap();
        assert_eq!(reset_cron(offset), "0 30 18 * * *");
    }

    #[test]
    fn reset_cron_for_negative_offset_fires_the_morning_after() {
        // -08:00 local midnight is 08:00 UTC the same day
        let offset = FixedOffset::west_opt(8 * 3600).unwrap();
        assert_eq!(reset_cron(offset), "0 0 8 * * *");
    }
}
