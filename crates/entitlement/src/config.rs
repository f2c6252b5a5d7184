//! Environment-driven configuration

use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};

use crate::error::{EntitlementError, EntitlementResult};

const DEFAULT_FREE_DAILY_LIMIT: u32 = 3;
const DEFAULT_STORE_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone)]
pub struct EntitlementConfig {
    /// Free-tier downloads per day, seeded into new records.
    pub free_daily_limit: u32,
    /// Reference offset for the daily quota boundary.
    pub reset_offset: FixedOffset,
    /// Shared secret for payment webhook signatures. Empty means payments
    /// are not configured; the reconciler then rejects every event.
    pub webhook_secret: String,
    /// Upper bound on individual store operations.
    pub store_timeout: Duration,
}

impl EntitlementConfig {
    pub fn from_env() -> EntitlementResult<Self> {
        let free_daily_limit = std::env::var("MAX_FREE_USES_PER_DAY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_FREE_DAILY_LIMIT);

        let reset_offset = match std::env::var("QUOTA_RESET_UTC_OFFSET") {
            Ok(raw) => parse_utc_offset(&raw)?,
            Err(_) => Utc.fix(),
        };

        let webhook_secret = std::env::var("PAYMENT_WEBHOOK_SECRET").unwrap_or_default();
        if webhook_secret.is_empty() {
            tracing::warn!(
                "PAYMENT_WEBHOOK_SECRET not set - payment events will be rejected"
            );
        }

        let store_timeout = std::env::var("STORE_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS));

        Ok(Self {
            free_daily_limit,
            reset_offset,
            webhook_secret,
            store_timeout,
        })
    }
}

/// Parse a `±HH:MM` reference offset ("Z" and "" mean UTC).
pub fn parse_utc_offset(raw: &str) -> EntitlementResult<FixedOffset> {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("z") {
        return Ok(Utc.fix());
    }

    let (sign, rest) = if let Some(rest) = raw.strip_prefix('+') {
        (1, rest)
    } else if let Some(rest) = raw.strip_prefix('-') {
        (-1, rest)
    } else {
        return Err(EntitlementError::Config(format!(
            "UTC offset must start with '+' or '-': {raw}"
        )));
    };

    let mut parts = rest.splitn(2, ':');
    let hours: i32 = parts
        .next()
        .and_then(|h| h.parse().ok())
        .ok_or_else(|| EntitlementError::Config(format!("unparseable UTC offset: {raw}")))?;
    let minutes: i32 = match parts.next() {
        Some(m) => m
            .parse()
            .map_err(|_| EntitlementError::Config(format!("unparseable UTC offset: {raw}")))?,
        None => 0,
    };

    // The sign lives only in the prefix; negative components are malformed.
    if !(0..=14).contains(&hours) || !(0..=59).contains(&minutes) {
        return Err(EntitlementError::Config(format!(
            "UTC offset out of range: {raw}"
        )));
    }

    let seconds = sign * (hours * 3600 + minutes * 60);
    FixedOffset::east_opt(seconds)
        .ok_or_else(|| EntitlementError::Config(format!("UTC offset out of range: {raw}")))
}
