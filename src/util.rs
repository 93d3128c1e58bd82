//! Internal utilities shared across the crate.

use std::time::{SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp in seconds.
#[inline]
pub(crate) fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_secs()
}

/// Basic email format validation.
///
/// Checks for a single `@`, a non-empty local part, and a dotted domain.
/// Not RFC 5322 compliant but catches obvious formatting errors.
#[inline]
pub(crate) fn is_valid_email(email: &str) -> bool {
    let email = email.trim();

    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 {
        return false;
    }

    let local = parts[0];
    let domain = parts[1];

    if local.is_empty() {
        return false;
    }

    if !domain.contains('.') {
        return false;
    }

    if domain.starts_with('.') || domain.ends_with('.') {
        return false;
    }

    if let Some(tld) = domain.rsplit('.').next() {
        if tld.is_empty() {
            return false;
        }
    }

    true
}

/// Generate an unguessable URL-safe token for invitations.
pub(crate) fn generate_secure_token() -> String {
    use base64::Engine;
    use rand::Rng;

    let mut bytes = [0u8; 32];
    rand::thread_rng().fill(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}
