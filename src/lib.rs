//! Seatkeeper - invitation and subscription core for multi-tenant SaaS
//!
//! Seatkeeper owns two coupled concerns for a tenant: who may join an
//! organization (invitations, seat limits, member maintenance) and what the
//! organization is paying for (checkout, subscription lifecycle, webhook
//! ingress, expiry sweep). Storage, notification delivery, credential
//! hashing, and the payment gateway are trait seams; in-memory and mock
//! implementations back the test suite.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use seatkeeper::{
//!     default_catalog, BillingConfig, ConsoleNotifier, InMemoryTenantStore,
//!     InvitationConfig, InvitationManager, MockPaymentGateway,
//!     PlainCredentialIssuer, SubscriptionManager,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     seatkeeper::init_tracing();
//!
//!     let store = Arc::new(InMemoryTenantStore::new());
//!     store.seed_plans(default_catalog());
//!
//!     let invitations = InvitationManager::new(
//!         Arc::clone(&store),
//!         Arc::new(ConsoleNotifier),
//!         Arc::new(PlainCredentialIssuer),
//!         InvitationConfig::from_env(),
//!     );
//!     let billing = SubscriptionManager::new(
//!         Arc::clone(&store),
//!         Arc::new(MockPaymentGateway::new()),
//!         BillingConfig::from_env(),
//!     );
//!     // wire managers into your HTTP layer
//!     let _ = (invitations, billing);
//! }
//! ```

pub mod billing;
mod config;
pub mod credentials;
mod error;
mod identity;
pub mod invitations;
pub mod notify;
pub mod plans;
pub mod storage;
mod util;

pub use billing::{
    CheckoutIntent, CheckoutRequest, CheckoutSession, MockPaymentGateway, PaymentGateway,
    SubscriptionManager, SubscriptionView, SweeperHandle, WebhookEvent, WebhookIngress,
    WebhookOutcome,
};
pub use config::{BillingConfig, InvitationConfig, SweepConfig};
pub use credentials::{CredentialIssuer, PlainCredentialIssuer};
pub use error::{CoreError, Result};
pub use identity::{Capability, Identity, Role};
pub use invitations::{AcceptedMember, DeliveryStatus, InvitationManager, InvitationOutcome};
pub use notify::{ConsoleNotifier, InvitationNotice, NotificationSender, RecordingNotifier};
pub use plans::{default_catalog, PlanEnforcer, SeatUsage};
pub use storage::{
    BillingCycle, InMemoryTenantStore, InvitationRecord, InvitationStore, OrganizationRecord,
    OrganizationStore, PaymentRecord, PaymentStatus, PaymentStore, PlanStore, PricingPlanRecord,
    TenantStore, UserRecord, UserStore, WebhookEventRecord, WebhookLedger,
};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing/logging with sensible defaults.
///
/// Call early in `main()`, before constructing managers.
///
/// # Environment Variables
///
/// - `RUST_LOG`: log level filter (e.g. "info", "seatkeeper=debug")
/// - `SEATKEEPER_LOG_JSON`: set to "true" for JSON formatted logs
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json_logs = std::env::var("SEATKEEPER_LOG_JSON")
        .map(|v| v.parse::<bool>().unwrap_or(false))
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
