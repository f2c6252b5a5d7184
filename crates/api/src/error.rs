//! HTTP mapping for entitlement errors
//!
//! Rejections the caller can fix map to 4xx; store trouble maps to 503 so
//! the payment processor's delivery machinery retries, and everything else
//! is a 500.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use linkvault_entitlement::EntitlementError;
use serde_json::json;

pub struct ApiError(EntitlementError);

pub type ApiResult<T> = Result<T, ApiError>;

impl From<EntitlementError> for ApiError {
    fn from(err: EntitlementError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EntitlementError::Validation(_)
            | EntitlementError::UnknownPlan(_)
            | EntitlementError::AmountMismatch { .. } => StatusCode::BAD_REQUEST,
            EntitlementError::SignatureMismatch => StatusCode::UNAUTHORIZED,
            EntitlementError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            EntitlementError::Store(_) | EntitlementError::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        if status.is_server_error() {
            tracing::error!(error = %self.0, status = %status, "request failed");
        }

        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}
