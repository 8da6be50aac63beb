// CSRF state for the authorization redirect

use uuid::Uuid;

use super::error::{AuthError, Result};

/// Fresh per-attempt state value
pub fn generate_state() -> String {
    Uuid::new_v4().to_string()
}

/// Check the state echoed back on the callback against the one issued.
///
/// A missing received value, a missing stored value, and a mismatch all fail
/// with `CsrfMismatch`.
pub fn validate_state(received: Option<&str>, stored: Option<&str>) -> Result<()> {
    let (Some(received), Some(stored)) = (received, stored) else {
        return Err(AuthError::CsrfMismatch);
    };

    if received.is_empty() || stored.is_empty() {
        return Err(AuthError::CsrfMismatch);
    }

    if constant_time_eq(received.as_bytes(), stored.as_bytes()) {
        Ok(())
    } else {
        Err(AuthError::CsrfMismatch)
    }
}

/// Constant-time comparison to prevent timing attacks
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }

    result == 0
}
