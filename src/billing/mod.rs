//! Subscription billing: checkout, lifecycle transitions, webhook ingress,
//! and the expiry sweep.

mod gateway;
mod manager;
mod sweep;
mod transitions;
mod webhook;

pub use gateway::{CheckoutRequest, CheckoutSession, MockPaymentGateway, PaymentGateway};
pub use manager::{CheckoutIntent, SubscriptionManager, SubscriptionView};
pub use sweep::{spawn_sweeper, SweeperHandle};
pub use transitions::{can_transition, check_transition};
pub use webhook::{
    sign_payload, WebhookEvent, WebhookEventData, WebhookIngress, WebhookOutcome,
};
