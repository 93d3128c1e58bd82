//! Configuration for the invitation and billing managers.
//!
//! Configuration is injected at construction time rather than read ad hoc
//! from process environment, so tests can vary limits without process-wide
//! environment mutation. `from_env` constructors exist for the process entry
//! point.

use std::time::Duration;

/// Configuration for invitation management.
///
/// # Example
///
/// ```rust
/// use seatkeeper::InvitationConfig;
///
/// let config = InvitationConfig::new()
///     .expiry_days(14)
///     .activation_base_url("https://app.example.com/accept-invitation");
/// ```
#[derive(Clone, Debug)]
pub struct InvitationConfig {
    /// Days until an invitation expires.
    pub expiry_days: u32,

    /// Base URL the activation link is built from. The token is appended as
    /// a query parameter.
    pub activation_base_url: String,

    /// Timeout for the detached notification dispatch. A hung mail backend
    /// must not hang the caller.
    pub notify_timeout: Duration,
}

impl Default for InvitationConfig {
    fn default() -> Self {
        Self {
            expiry_days: 7,
            activation_base_url: "http://localhost:5173/accept-invitation".to_string(),
            notify_timeout: Duration::from_secs(10),
        }
    }
}

impl InvitationConfig {
    /// Create a new configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set invitation expiry in days.
    #[must_use]
    pub fn expiry_days(mut self, days: u32) -> Self {
        self.expiry_days = days;
        self
    }

    /// Set the base URL for activation links.
    #[must_use]
    pub fn activation_base_url(mut self, url: impl Into<String>) -> Self {
        self.activation_base_url = url.into();
        self
    }

    /// Set the notification dispatch timeout.
    #[must_use]
    pub fn notify_timeout(mut self, timeout: Duration) -> Self {
        self.notify_timeout = timeout;
        self
    }

    /// Get expiry duration in seconds.
    #[must_use]
    pub fn expiry_seconds(&self) -> u64 {
        u64::from(self.expiry_days) * 86_400
    }

    /// Build a configuration from environment variables.
    ///
    /// Reads `INVITATION_EXPIRY_DAYS` and `FRONTEND_URL`; missing or
    /// malformed values fall back to defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(days) = std::env::var("INVITATION_EXPIRY_DAYS") {
            if let Ok(days) = days.parse() {
                config.expiry_days = days;
            }
        }
        if let Ok(url) = std::env::var("FRONTEND_URL") {
            config.activation_base_url = format!("{}/accept-invitation", url.trim_end_matches('/'));
        }
        config
    }
}

/// Configuration for the subscription lifecycle manager.
#[derive(Clone, Debug)]
pub struct BillingConfig {
    /// URL the payment processor redirects to after a successful checkout.
    pub checkout_success_url: String,

    /// URL the payment processor redirects to after an abandoned checkout.
    pub checkout_cancel_url: String,

    /// Lifetime of a checkout session before the processor expires it.
    pub checkout_expiry: Duration,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            checkout_success_url: "http://localhost:5173/payment/success".to_string(),
            checkout_cancel_url: "http://localhost:5173/payment/cancel".to_string(),
            checkout_expiry: Duration::from_secs(3600),
        }
    }
}

impl BillingConfig {
    /// Create a new configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the checkout success redirect URL.
    #[must_use]
    pub fn checkout_success_url(mut self, url: impl Into<String>) -> Self {
        self.checkout_success_url = url.into();
        self
    }

    /// Set the checkout cancel redirect URL.
    #[must_use]
    pub fn checkout_cancel_url(mut self, url: impl Into<String>) -> Self {
        self.checkout_cancel_url = url.into();
        self
    }

    /// Set the checkout session lifetime.
    #[must_use]
    pub fn checkout_expiry(mut self, expiry: Duration) -> Self {
        self.checkout_expiry = expiry;
        self
    }

    /// Build a configuration from environment variables.
    ///
    /// Reads `FRONTEND_URL` for the redirect URLs; missing values fall back
    /// to defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("FRONTEND_URL") {
            let base = url.trim_end_matches('/');
            config.checkout_success_url = format!("{base}/payment/success");
            config.checkout_cancel_url = format!("{base}/payment/cancel");
        }
        config
    }
}

/// Configuration for the periodic subscription expiry sweep.
#[derive(Clone, Debug)]
pub struct SweepConfig {
    /// Interval between sweep runs.
    pub interval: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
        }
    }
}

impl SweepConfig {
    /// Create a new configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sweep interval.
    #[must_use]
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invitation_config_defaults() {
        let config = InvitationConfig::default();
        assert_eq!(config.expiry_days, 7);
        assert_eq!(config.expiry_seconds(), 7 * 86_400);
    }

    #[test]
    fn test_invitation_config_builder() {
        let config = InvitationConfig::new()
            .expiry_days(14)
            .activation_base_url("https://app.example.com/join");

        assert_eq!(config.expiry_days, 14);
        assert_eq!(config.activation_base_url, "https://app.example.com/join");
    }

    #[test]
    fn test_billing_config_builder() {
        let config = BillingConfig::new()
            .checkout_success_url("https://app.example.com/ok")
            .checkout_expiry(Duration::from_secs(900));

        assert_eq!(config.checkout_success_url, "https://app.example.com/ok");
        assert_eq!(config.checkout_expiry, Duration::from_secs(900));
    }

    #[test]
    fn test_sweep_config_default_hourly() {
        assert_eq!(SweepConfig::default().interval, Duration::from_secs(3600));
    }
}
