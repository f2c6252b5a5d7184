//! Premium plan catalog
//!
//! Read-only mapping from plan id to duration and price, consumed by the
//! payment reconciler to validate incoming confirmations and exposed over
//! the API for upsell display.

use crate::error::{EntitlementError, EntitlementResult};

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Plan {
    pub id: String,
    pub name: String,
    pub duration_days: i64,
    /// Price in minor currency units (paise).
    pub price_minor: i64,
    pub description: String,
}

impl Plan {
    pub fn duration(&self) -> chrono::Duration {
        chrono::Duration::days(self.duration_days)
    }
}

#[derive(Debug, Clone)]
pub struct PlanCatalog {
    plans: Vec<Plan>,
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self {
            plans: vec![
                Plan {
                    id: "monthly".to_string(),
                    name: "Monthly Premium".to_string(),
                    duration_days: 30,
                    price_minor: 4_900,
                    description: "30 days of unlimited downloads".to_string(),
                },
                Plan {
                    id: "quarterly".to_string(),
                    name: "Quarterly Premium".to_string(),
                    duration_days: 90,
                    price_minor: 12_900,
                    description: "90 days of unlimited downloads".to_string(),
                },
                Plan {
                    id: "yearly".to_string(),
                    name: "Yearly Premium".to_string(),
                    duration_days: 365,
                    price_minor: 49_900,
                    description: "365 days of unlimited downloads".to_string(),
                },
            ],
        }
    }
}

impl PlanCatalog {
    /// Built-in plans, overridable with a `PLAN_CATALOG_JSON` environment
    /// variable holding a JSON array of plans. An unparseable override is a
    /// configuration error rather than a silent fallback.
    pub fn from_env() -> EntitlementResult<Self> {
        match std::env::var("PLAN_CATALOG_JSON") {
            Ok(raw) => Self::from_json(&raw),
            Err(_) => Ok(Self::default()),
        }
    }

    pub fn from_json(raw: &str) -> EntitlementResult<Self> {
        let plans: Vec<Plan> = serde_json::from_str(raw)
            .map_err(|e| EntitlementError::Config(format!("invalid plan catalog: {e}")))?;
        if plans.is_empty() {
            return Err(EntitlementError::Config("plan catalog is empty".to_string()));
        }
        Ok(Self { plans })
    }

    pub fn get(&self, plan_id: &str) -> Option<&Plan> {
        self.plans.iter().find(|p| p.id == plan_id)
    }

    pub fn all(&self) -> &[Plan] {
        &self.plans
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_catalog_has_three_plans() {
        let catalog = PlanCatalog::default();
        assert_eq!(catalog.all().len(), 3);
        let monthly = catalog.get("monthly").unwrap();
        assert_eq!(monthly.duration_days, 30);
        assert_eq!(monthly.price_minor, 4_900);
        assert!(catalog.get("lifetime").is_none());
    }

    #[test]
    fn json_override_replaces_defaults() {
        let catalog = PlanCatalog::from_json(
            r#"[{"id":"weekly","name":"Weekly","duration_days":7,"price_minor":1500,"description":"7 days"}]"#,
        )
        .unwrap();
        assert_eq!(catalog.all().len(), 1);
        assert_eq!(catalog.get("weekly").unwrap().duration_days, 7);
    }

    #[test]
    fn empty_or_malformed_override_is_rejected() {
        assert!(PlanCatalog::from_json("[]").is_err());
        assert!(PlanCatalog::from_json("not json").is_err());
    }
}
