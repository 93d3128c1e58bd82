//! Storage layer: stored records, trait seams, and the in-memory
//! implementation used by tests.

mod memory;
mod records;
mod traits;

pub use memory::InMemoryTenantStore;
pub use records::{
    BillingCycle, InvitationRecord, OrganizationRecord, PaymentRecord, PaymentStatus,
    PricingPlanRecord, UserRecord, WebhookEventRecord,
};
pub use traits::{
    InvitationStore, OrganizationStore, PaymentStore, PlanStore, TenantStore, UserStore,
    WebhookLedger,
};
