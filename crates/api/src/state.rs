//! Application state

use linkvault_entitlement::EntitlementService;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub entitlements: EntitlementService,
}

impl AppState {
    pub fn new(entitlements: EntitlementService) -> Self {
        Self { entitlements }
    }
}
