//! Storage traits for tenant data.
//!
//! Implement these against an ACID-transactional store. The stated
//! uniqueness constraints must be enforced at the storage layer, not merely
//! in application code: they are the managers' main race-safety mechanism.
//! Constraint violations surface as [`CoreError::Conflict`].

use super::records::{
    InvitationRecord, OrganizationRecord, PaymentRecord, PricingPlanRecord, UserRecord,
    WebhookEventRecord,
};
use crate::error::Result;
use async_trait::async_trait;

/// Organization storage.
#[async_trait]
pub trait OrganizationStore: Send + Sync {
    /// Create an organization. Slug is unique.
    async fn create_org(&self, org: &OrganizationRecord) -> Result<()>;

    /// Find an organization by ID.
    async fn find_org(&self, id: &str) -> Result<Option<OrganizationRecord>>;
}

/// User storage.
///
/// `(organization_id, email)` is unique among rows with a non-null
/// organization; `create_user` must fail with a conflict when violated.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Create a user. Fails with a conflict on a duplicate
    /// (organization, email) pair.
    async fn create_user(&self, user: &UserRecord) -> Result<()>;

    /// Find a user by ID.
    async fn find_user(&self, id: &str) -> Result<Option<UserRecord>>;

    /// Find a user by email within an organization.
    async fn find_user_by_email(&self, org_id: &str, email: &str) -> Result<Option<UserRecord>>;

    /// Update a user row.
    async fn update_user(&self, user: &UserRecord) -> Result<()>;

    /// Count active users in an organization.
    async fn count_active_users(&self, org_id: &str) -> Result<u32>;

    /// List all users in an organization.
    async fn list_users(&self, org_id: &str) -> Result<Vec<UserRecord>>;
}

/// Invitation storage.
///
/// The storage constraint is stricter than the lifecycle needs: one row per
/// (organization, email) regardless of state, plus a globally unique token.
/// The lifecycle manager clears stale accepted rows to re-offer an email.
#[async_trait]
pub trait InvitationStore: Send + Sync {
    /// Create an invitation. Fails with a conflict on a duplicate
    /// (organization, email) pair or token.
    async fn create_invitation(&self, invitation: &InvitationRecord) -> Result<()>;

    /// Find an invitation by its token.
    async fn find_invitation_by_token(&self, token: &str) -> Result<Option<InvitationRecord>>;

    /// Find an invitation by ID.
    async fn find_invitation(&self, id: &str) -> Result<Option<InvitationRecord>>;

    /// Find the invitation for an email within an organization, any state.
    async fn find_invitation_by_email(
        &self,
        org_id: &str,
        email: &str,
    ) -> Result<Option<InvitationRecord>>;

    /// List pending (unaccepted, unexpired at `now`) invitations.
    async fn list_pending_invitations(&self, org_id: &str, now: u64)
        -> Result<Vec<InvitationRecord>>;

    /// List invitations sent by a user, newest first.
    async fn list_invitations_sent_by(&self, user_id: &str) -> Result<Vec<InvitationRecord>>;

    /// Mark an invitation accepted. Monotonic; never unset.
    async fn mark_invitation_accepted(&self, id: &str, now: u64) -> Result<()>;

    /// Update an invitation row (token/expiry rotation on resend).
    async fn update_invitation(&self, invitation: &InvitationRecord) -> Result<()>;

    /// Hard-delete an invitation row.
    async fn delete_invitation(&self, id: &str) -> Result<()>;

    /// Count pending invitations for an organization.
    async fn count_pending_invitations(&self, org_id: &str, now: u64) -> Result<u32> {
        Ok(self.list_pending_invitations(org_id, now).await?.len() as u32)
    }
}

/// Payment (subscription record) storage.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Create a payment row.
    async fn create_payment(&self, payment: &PaymentRecord) -> Result<()>;

    /// Find a payment by ID.
    async fn find_payment(&self, id: &str) -> Result<Option<PaymentRecord>>;

    /// Find the active payment for an organization, if any.
    ///
    /// The authoritative "is there an active plan" query. Implementations
    /// should surface more than one active row as an internal error rather
    /// than silently picking one.
    async fn find_active_payment(&self, org_id: &str) -> Result<Option<PaymentRecord>>;

    /// Find a payment by the processor's subscription identifier.
    async fn find_payment_by_external_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<Option<PaymentRecord>>;

    /// Update a payment row.
    async fn update_payment(&self, payment: &PaymentRecord) -> Result<()>;

    /// Update a payment row and the owning organization's
    /// `current_payment_id` pointer in one transaction.
    ///
    /// The two writes must be consistent: a payment marked active without
    /// the pointer updated is an invariant violation.
    async fn update_payment_and_pointer(
        &self,
        payment: &PaymentRecord,
        current_payment_id: Option<String>,
    ) -> Result<()>;

    /// List all payments for an organization, newest first.
    async fn list_payments(&self, org_id: &str) -> Result<Vec<PaymentRecord>>;

    /// List active payments whose period ended at or before `now`.
    async fn list_active_payments_expiring(&self, now: u64) -> Result<Vec<PaymentRecord>>;
}

/// Pricing plan catalog storage. Read-mostly.
#[async_trait]
pub trait PlanStore: Send + Sync {
    /// Create a catalog entry.
    async fn create_plan(&self, plan: &PricingPlanRecord) -> Result<()>;

    /// Find a plan by ID.
    async fn find_plan(&self, id: &str) -> Result<Option<PricingPlanRecord>>;

    /// Find a plan by name.
    async fn find_plan_by_name(&self, name: &str) -> Result<Option<PricingPlanRecord>>;

    /// Find a plan by the processor's price identifier (monthly or yearly).
    async fn find_plan_by_external_price(
        &self,
        price_id: &str,
    ) -> Result<Option<PricingPlanRecord>>;

    /// List active plans.
    async fn list_plans(&self) -> Result<Vec<PricingPlanRecord>>;
}

/// Webhook idempotency ledger.
///
/// Records external event IDs so a retried delivery of an event that was
/// already processed is a guaranteed no-op. Entries left unprocessed by a
/// dispatch failure stay eligible for retry.
#[async_trait]
pub trait WebhookLedger: Send + Sync {
    /// Find a ledger entry by external event ID.
    async fn find_event(&self, external_event_id: &str) -> Result<Option<WebhookEventRecord>>;

    /// Record an event as seen. Fails with a conflict if already recorded.
    async fn record_event(&self, event: &WebhookEventRecord) -> Result<()>;

    /// Update a ledger entry's outcome. The entry itself stays recorded so
    /// operators can see processing failures and replay.
    async fn mark_event(
        &self,
        external_event_id: &str,
        processed: bool,
        processing_error: Option<String>,
    ) -> Result<()>;
}

/// Convenience alias: the full set of storage capabilities the managers
/// need from a tenant store.
pub trait TenantStore:
    OrganizationStore + UserStore + InvitationStore + PaymentStore + PlanStore + WebhookLedger
{
}

impl<T> TenantStore for T where
    T: OrganizationStore + UserStore + InvitationStore + PaymentStore + PlanStore + WebhookLedger
{
}
