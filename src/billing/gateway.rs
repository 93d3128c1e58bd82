//! Payment gateway seam.
//!
//! Abstracts the external payment processor. The crate only needs checkout
//! session creation and subscription cancellation; everything else arrives
//! through webhooks.

use crate::error::{CoreError, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// Request to open a hosted checkout session.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    /// The processor's price identifier to bill.
    pub price_id: String,
    /// Opaque correlation handle echoed back in the completion webhook.
    /// This crate always passes the local payment ID.
    pub client_reference_id: String,
    /// Purchaser email, prefilled in the checkout page.
    pub customer_email: String,
    /// Redirect after a successful checkout.
    pub success_url: String,
    /// Redirect after an abandoned checkout.
    pub cancel_url: String,
    /// When the session expires (Unix seconds).
    pub expires_at: u64,
}

/// An opened checkout session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSession {
    /// The processor's session identifier.
    pub session_id: String,
    /// Hosted checkout URL to redirect the purchaser to.
    pub url: String,
}

/// External payment processor operations.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Open a hosted checkout session.
    async fn create_checkout_session(&self, request: &CheckoutRequest) -> Result<CheckoutSession>;

    /// Cancel a subscription at the processor.
    async fn cancel_subscription(&self, subscription_id: &str) -> Result<()>;
}

#[derive(Default)]
struct MockGatewayState {
    sessions: Vec<CheckoutRequest>,
    cancelled: Vec<String>,
    fail_checkout: bool,
    fail_cancel: bool,
    counter: u64,
}

/// In-memory gateway for tests and development.
///
/// Records every call and can be told to fail, so both happy paths and
/// gateway-outage paths are exercisable without a network.
#[derive(Default, Clone)]
pub struct MockPaymentGateway {
    state: Arc<Mutex<MockGatewayState>>,
}

impl MockPaymentGateway {
    /// Create a gateway that succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make checkout session creation fail.
    pub fn fail_checkout(&self, fail: bool) {
        self.state.lock().unwrap().fail_checkout = fail;
    }

    /// Make subscription cancellation fail.
    pub fn fail_cancel(&self, fail: bool) {
        self.state.lock().unwrap().fail_cancel = fail;
    }

    /// Checkout requests seen so far.
    #[must_use]
    pub fn sessions(&self) -> Vec<CheckoutRequest> {
        self.state.lock().unwrap().sessions.clone()
    }

    /// Subscription IDs cancelled so far.
    #[must_use]
    pub fn cancelled(&self) -> Vec<String> {
        self.state.lock().unwrap().cancelled.clone()
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn create_checkout_session(&self, request: &CheckoutRequest) -> Result<CheckoutSession> {
        let mut state = self.state.lock().unwrap();
        if state.fail_checkout {
            return Err(CoreError::external(
                "payment_gateway",
                "checkout session creation refused",
            ));
        }
        state.counter += 1;
        state.sessions.push(request.clone());
        let session_id = format!("cs_test_{}", state.counter);
        Ok(CheckoutSession {
            url: format!("https://checkout.example.com/{session_id}"),
            session_id,
        })
    }

    async fn cancel_subscription(&self, subscription_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_cancel {
            return Err(CoreError::external(
                "payment_gateway",
                "subscription cancellation refused",
            ));
        }
        state.cancelled.push(subscription_id.to_string());
        Ok(())
    }
}
