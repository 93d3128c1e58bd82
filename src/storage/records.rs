//! Stored record types.
//!
//! These are the durable entities the managers operate on. Every tenant-owned
//! record carries an `organization_id` and must never be visible or mutable
//! across organization boundaries; the storage layer enforces the uniqueness
//! constraints that back the managers' race safety.

use crate::identity::Role;
use serde::{Deserialize, Serialize};

/// Tenant root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrganizationRecord {
    /// Unique identifier.
    pub id: String,
    /// Organization name.
    pub name: String,
    /// Unique display handle.
    pub slug: String,
    /// The owning user (the original public signup).
    pub super_admin_id: String,
    /// Pointer to the currently active payment, if any. A cache over the
    /// authoritative "active payment row" query, never the sole source of
    /// truth.
    pub current_payment_id: Option<String>,
    /// Creation timestamp (Unix seconds).
    pub created_at: u64,
}

/// Identity within a tenant.
///
/// `(organization_id, email)` is unique at the storage layer; the same email
/// may exist in multiple organizations as distinct users. Removal from an
/// organization clears `organization_id` rather than deleting the row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserRecord {
    /// Unique identifier.
    pub id: String,
    /// Display name.
    pub full_name: String,
    /// Email address.
    pub email: String,
    /// Opaque credential hash; hashing happens outside this crate.
    pub password_hash: String,
    /// Role within the organization.
    pub role: Role,
    /// Whether the account is active.
    pub is_active: bool,
    /// True if the account was created via invitation acceptance.
    pub is_invited: bool,
    /// True only for the original tenant-creating signup.
    pub is_public_admin: bool,
    /// Owning organization; `None` after removal.
    pub organization_id: Option<String>,
    /// Creation timestamp (Unix seconds).
    pub created_at: u64,
}

/// A pending offer to join an organization.
///
/// Transitions once, monotonically: pending to accepted (terminal), pending
/// to revoked (deletion), or pending to expired (derived from `expires_at`
/// at read time, not stored).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InvitationRecord {
    /// Unique identifier.
    pub id: String,
    /// Invitee email address.
    pub email: String,
    /// Opaque unguessable token, URL-safe.
    pub token: String,
    /// Role to be granted. Never `SuperAdmin`.
    pub role: Role,
    /// Expiration timestamp (Unix seconds).
    pub expires_at: u64,
    /// Creation timestamp (Unix seconds).
    pub created_at: u64,
    /// User who sent the invitation.
    pub sent_by_id: String,
    /// Owning organization.
    pub organization_id: String,
    /// Whether the invitation has been accepted. Monotonic: once true,
    /// never false again.
    pub accepted: bool,
    /// When the invitation was accepted.
    pub accepted_at: Option<u64>,
}

impl InvitationRecord {
    /// Whether the invitation has expired at `now`.
    ///
    /// The validity window is closed-open: `expires_at` exactly equal to
    /// `now` counts as expired.
    #[must_use]
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    /// Whether the invitation is still pending (unaccepted and unexpired).
    #[must_use]
    pub fn is_pending(&self, now: u64) -> bool {
        !self.accepted && !self.is_expired(now)
    }
}

/// Subscription record status.
///
/// Legal transitions are defined by [`crate::billing::can_transition`];
/// status writes outside that table are rejected. Plan switches cancel the
/// old row and insert a new one rather than mutating in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Awaiting external checkout confirmation.
    Pending,
    /// The row currently governing the organization's plan.
    Active,
    /// A renewal payment failed; may recover to active.
    PastDue,
    /// Cancelled by the owner or the processor. Terminal.
    Cancelled,
    /// Period end passed without renewal. Terminal.
    Expired,
}

impl PaymentStatus {
    /// Convert to the stored string form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::PastDue => "past_due",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Billing interval for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingCycle {
    /// Billed monthly.
    Monthly,
    /// Billed yearly.
    Yearly,
}

impl BillingCycle {
    /// Convert to the stored string form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
        }
    }
}

/// One subscription period/attempt for an organization.
///
/// At most one payment per organization has status `Active` at any instant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentRecord {
    /// Unique identifier. Also the correlation handle embedded in external
    /// checkout sessions.
    pub id: String,
    /// Owning organization.
    pub organization_id: String,
    /// Purchasing user.
    pub user_id: String,
    /// Plan name at purchase time (history is preserved per row).
    pub plan_name: String,
    /// Catalog entry this payment was created from.
    pub pricing_plan_id: Option<String>,
    /// Billing interval.
    pub billing_cycle: BillingCycle,
    /// The processor's subscription identifier, once known.
    pub external_subscription_id: Option<String>,
    /// The processor's customer identifier, once known.
    pub external_customer_id: Option<String>,
    /// Current status.
    pub status: PaymentStatus,
    /// Period start (Unix seconds).
    pub current_period_start: u64,
    /// Period end (Unix seconds).
    pub current_period_end: u64,
    /// Whether the subscription will cancel at period end.
    pub cancel_at_period_end: bool,
    /// Creation timestamp (Unix seconds).
    pub created_at: u64,
    /// Last update timestamp (Unix seconds).
    pub updated_at: u64,
}

impl PaymentRecord {
    /// Whether the period has ended at `now`.
    #[must_use]
    pub fn is_period_over(&self, now: u64) -> bool {
        now >= self.current_period_end
    }
}

/// Catalog entry driving plan limits and pricing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PricingPlanRecord {
    /// Unique identifier.
    pub id: String,
    /// Plan name ("Free", "Pro", "Team").
    pub name: String,
    /// URL-safe handle.
    pub slug: String,
    /// Member limit; `None` means unbounded.
    pub member_limit: Option<u32>,
    /// Monthly price in whole currency units.
    pub price_monthly: f64,
    /// Yearly price in whole currency units.
    pub price_yearly: f64,
    /// Marketing description.
    pub description: String,
    /// Subscription period length in days.
    pub duration_days: u32,
    /// The processor's price identifier for monthly billing.
    pub external_price_id_monthly: String,
    /// The processor's price identifier for yearly billing.
    pub external_price_id_yearly: String,
    /// Whether the plan is available for purchase.
    pub is_active: bool,
}

impl PricingPlanRecord {
    /// Period length in seconds.
    #[must_use]
    pub fn duration_seconds(&self) -> u64 {
        u64::from(self.duration_days) * 86_400
    }
}

/// Idempotency ledger entry for an external webhook event.
///
/// The same `external_event_id` must never mutate payment state twice.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebhookEventRecord {
    /// The processor's event identifier. Unique.
    pub external_event_id: String,
    /// Event type string as delivered.
    pub event_type: String,
    /// Whether dispatch completed.
    pub processed: bool,
    /// Error detail from a failed dispatch, kept for operator replay.
    pub processing_error: Option<String>,
    /// When the event was first seen (Unix seconds).
    pub received_at: u64,
}
