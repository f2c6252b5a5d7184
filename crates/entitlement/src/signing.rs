//! Payment signature verification
//!
//! The payment processor signs `payment_id|user_id|plan_id|amount` with the
//! shared webhook secret (HMAC-SHA256, hex-encoded). Verification is
//! constant-time via `Mac::verify_slice`.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{EntitlementError, EntitlementResult};

type HmacSha256 = Hmac<Sha256>;

fn signed_payload(payment_id: &str, user_id: &str, plan_id: &str, amount: i64) -> String {
    format!("{payment_id}|{user_id}|{plan_id}|{amount}")
}

/// Compute the expected hex signature for a payment payload.
pub fn payment_signature(
    secret: &str,
    payment_id: &str,
    user_id: &str,
    plan_id: &str,
    amount: i64,
) -> EntitlementResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| EntitlementError::Config("invalid webhook secret".to_string()))?;
    mac.update(signed_payload(payment_id, user_id, plan_id, amount).as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a received signature against the shared secret.
pub fn verify_payment_signature(
    secret: &str,
    payment_id: &str,
    user_id: &str,
    plan_id: &str,
    amount: i64,
    signature: &str,
) -> bool {
    let Ok(received) = hex::decode(signature) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(signed_payload(payment_id, user_id, plan_id, amount).as_bytes());
    mac.verify_slice(&received).is_ok()
}
