//! Subscription lifecycle manager.
//!
//! Plan switches never mutate a subscription row in place: the old row is
//! cancelled and a new one inserted, so payment history is append-only and
//! "at most one active row per organization" stays checkable. Rows are
//! created `Pending` and only a confirmed checkout activates them.

use super::gateway::{CheckoutRequest, PaymentGateway};
use super::transitions::check_transition;
use crate::config::BillingConfig;
use crate::error::{CoreError, Result};
use crate::identity::{Capability, Identity};
use crate::storage::{
    BillingCycle, OrganizationRecord, OrganizationStore, PaymentRecord, PaymentStatus,
    PaymentStore, PlanStore, PricingPlanRecord, UserStore,
};
use crate::util::current_timestamp;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// A started checkout: redirect the purchaser and wait for the webhook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutIntent {
    /// The local payment row awaiting confirmation. Doubles as the
    /// correlation handle embedded in the checkout session.
    pub payment_id: String,
    /// Hosted checkout URL.
    pub checkout_url: String,
}

/// Point-in-time subscription state for an organization.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionView {
    /// Governing plan name. "Free" when no active payment exists.
    pub plan_name: String,
    /// Status of the governing payment row; `None` when the organization
    /// has never subscribed.
    pub status: Option<PaymentStatus>,
    /// Period end of the governing payment row.
    pub current_period_end: Option<u64>,
    /// Whether the subscription winds down at period end.
    pub cancel_at_period_end: bool,
}

/// Subscription lifecycle manager.
pub struct SubscriptionManager<S, G> {
    store: Arc<S>,
    gateway: Arc<G>,
    config: BillingConfig,
}

impl<S, G> SubscriptionManager<S, G>
where
    S: OrganizationStore + UserStore + PaymentStore + PlanStore,
    G: PaymentGateway,
{
    /// Create a new subscription manager.
    pub fn new(store: Arc<S>, gateway: Arc<G>, config: BillingConfig) -> Self {
        Self {
            store,
            gateway,
            config,
        }
    }

    /// List purchasable plans.
    pub async fn available_plans(&self) -> Result<Vec<PricingPlanRecord>> {
        self.store.list_plans().await
    }

    /// Start a hosted checkout for a paid plan, selected by the processor
    /// price identifier.
    ///
    /// Requires tenant ownership. Any older pending row for the
    /// organization is cancelled as superseded before the new attempt. A
    /// gateway failure cancels the fresh row before the error propagates,
    /// so no orphaned pending rows survive the call.
    #[instrument(skip(self, actor), fields(org_id = %actor.organization_id, actor_id = %actor.user_id))]
    pub async fn start_checkout(
        &self,
        actor: &Identity,
        price_id: &str,
    ) -> Result<CheckoutIntent> {
        let organization = self.require_owner(actor).await?;
        let (plan, billing_cycle) = self.purchasable_plan(price_id).await?;

        if plan.price_monthly == 0.0 {
            return Err(CoreError::validation(
                "the free plan is not purchased through checkout",
            ));
        }

        self.check_member_fit(&organization.id, &plan).await?;

        if let Some(active) = self.store.find_active_payment(&organization.id).await? {
            if active.plan_name == plan.name && active.billing_cycle == billing_cycle {
                return Err(CoreError::conflict(format!(
                    "organization is already subscribed to '{}'",
                    plan.name
                )));
            }
        }

        self.cancel_superseded_pending(&organization.id).await?;

        let purchaser_email = self
            .store
            .find_user(&actor.user_id)
            .await?
            .map(|u| u.email)
            .ok_or_else(|| CoreError::not_found(format!("user {}", actor.user_id)))?;

        let now = current_timestamp();
        let payment = PaymentRecord {
            id: Uuid::new_v4().to_string(),
            organization_id: organization.id.clone(),
            user_id: actor.user_id.clone(),
            plan_name: plan.name.clone(),
            pricing_plan_id: Some(plan.id.clone()),
            billing_cycle,
            external_subscription_id: None,
            external_customer_id: None,
            status: PaymentStatus::Pending,
            current_period_start: now,
            current_period_end: now + plan.duration_seconds(),
            cancel_at_period_end: false,
            created_at: now,
            updated_at: now,
        };
        self.store.create_payment(&payment).await?;

        let request = CheckoutRequest {
            price_id: price_id.to_string(),
            client_reference_id: payment.id.clone(),
            customer_email: purchaser_email,
            success_url: self.config.checkout_success_url.clone(),
            cancel_url: self.config.checkout_cancel_url.clone(),
            expires_at: now + self.config.checkout_expiry.as_secs(),
        };

        let session = match self.gateway.create_checkout_session(&request).await {
            Ok(session) => session,
            Err(err) => {
                self.mark_payment(&payment.id, PaymentStatus::Cancelled).await?;
                return Err(err);
            }
        };

        info!(
            payment_id = %payment.id,
            plan = %plan.name,
            cycle = %billing_cycle.as_str(),
            "Checkout started"
        );

        Ok(CheckoutIntent {
            payment_id: payment.id,
            checkout_url: session.url,
        })
    }

    /// Move the organization onto the free plan.
    ///
    /// Refused while the organization has more members than the free tier
    /// seats. Any current paid subscription is cancelled, at the processor
    /// too when an external subscription exists.
    #[instrument(skip(self, actor), fields(org_id = %actor.organization_id, actor_id = %actor.user_id))]
    pub async fn downgrade_to_free(&self, actor: &Identity) -> Result<PaymentRecord> {
        let organization = self.require_owner(actor).await?;
        let plan = self
            .store
            .find_plan_by_name("Free")
            .await?
            .ok_or_else(|| CoreError::not_found("free plan"))?;

        self.check_member_fit(&organization.id, &plan).await?;

        if let Some(active) = self.store.find_active_payment(&organization.id).await? {
            if active.plan_name == plan.name {
                return Err(CoreError::conflict(
                    "organization is already on the free plan",
                ));
            }
            self.cancel_row(active).await?;
        }
        self.cancel_superseded_pending(&organization.id).await?;

        let now = current_timestamp();
        let payment = PaymentRecord {
            id: Uuid::new_v4().to_string(),
            organization_id: organization.id.clone(),
            user_id: actor.user_id.clone(),
            plan_name: plan.name.clone(),
            pricing_plan_id: Some(plan.id.clone()),
            billing_cycle: BillingCycle::Monthly,
            external_subscription_id: None,
            external_customer_id: None,
            status: PaymentStatus::Active,
            current_period_start: now,
            current_period_end: now + plan.duration_seconds(),
            cancel_at_period_end: false,
            created_at: now,
            updated_at: now,
        };
        self.store.create_payment(&payment).await?;
        self.store
            .update_payment_and_pointer(&payment, Some(payment.id.clone()))
            .await?;

        info!(payment_id = %payment.id, "Downgraded to free plan");
        Ok(payment)
    }

    /// Cancel the organization's current subscription.
    ///
    /// The processor-side cancellation is attempted first; if it fails the
    /// local row is still cancelled and the mismatch is left to operator
    /// reconciliation, since a paid-but-unwanted subscription is worse than
    /// a stray processor record.
    #[instrument(skip(self, actor), fields(org_id = %actor.organization_id, actor_id = %actor.user_id))]
    pub async fn cancel_subscription(&self, actor: &Identity) -> Result<()> {
        let organization = self.require_owner(actor).await?;
        let active = self
            .store
            .find_active_payment(&organization.id)
            .await?
            .ok_or_else(|| CoreError::not_found("active subscription"))?;

        self.cancel_row(active).await?;
        info!(org_id = %organization.id, "Subscription cancelled");
        Ok(())
    }

    /// Activate a pending payment after checkout completion.
    ///
    /// Called by the webhook handler with the correlation handle. A row
    /// already active is an idempotent no-op; any other non-pending status
    /// is a conflict. The previously active row, if any, is cancelled in
    /// the same call so the single-active invariant holds on exit.
    #[instrument(skip(self))]
    pub async fn confirm_checkout(
        &self,
        payment_id: &str,
        subscription_id: &str,
        customer_id: &str,
    ) -> Result<()> {
        let mut payment = self
            .store
            .find_payment(payment_id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("payment {payment_id}")))?;

        if payment.status == PaymentStatus::Active {
            return Ok(());
        }
        check_transition(payment.status, PaymentStatus::Active)?;

        if let Some(previous) = self.store.find_active_payment(&payment.organization_id).await? {
            if previous.id != payment.id {
                self.cancel_row(previous).await?;
            }
        }

        let now = current_timestamp();
        payment.status = PaymentStatus::Active;
        payment.external_subscription_id = Some(subscription_id.to_string());
        payment.external_customer_id = Some(customer_id.to_string());
        payment.current_period_start = now;
        payment.current_period_end = now + self.period_length(&payment).await?;
        payment.updated_at = now;

        self.store
            .update_payment_and_pointer(&payment, Some(payment.id.clone()))
            .await?;

        info!(
            payment_id,
            subscription_id,
            plan = %payment.plan_name,
            "Checkout confirmed, subscription active"
        );
        Ok(())
    }

    /// Record a successful renewal, recovering from past-due if needed.
    ///
    /// `period_end` comes from the processor when present; otherwise the
    /// period is extended by the plan's duration from now.
    #[instrument(skip(self))]
    pub async fn record_renewal(
        &self,
        subscription_id: &str,
        period_end: Option<u64>,
    ) -> Result<()> {
        let mut payment = self.find_by_subscription(subscription_id).await?;
        check_transition(payment.status, PaymentStatus::Active)?;

        let now = current_timestamp();
        let recovered = payment.status == PaymentStatus::PastDue;
        payment.status = PaymentStatus::Active;
        payment.current_period_end = match period_end {
            Some(end) => end,
            None => now + self.period_length(&payment).await?,
        };
        payment.updated_at = now;

        self.store
            .update_payment_and_pointer(&payment, Some(payment.id.clone()))
            .await?;

        info!(
            subscription_id,
            payment_id = %payment.id,
            recovered,
            "Renewal recorded"
        );
        Ok(())
    }

    /// Mark a subscription past due after a failed renewal payment.
    ///
    /// The row keeps its external linkage so a later successful retry can
    /// recover it, but it stops governing the plan immediately.
    #[instrument(skip(self))]
    pub async fn record_payment_failure(&self, subscription_id: &str) -> Result<()> {
        let mut payment = self.find_by_subscription(subscription_id).await?;
        if payment.status == PaymentStatus::PastDue {
            return Ok(());
        }
        check_transition(payment.status, PaymentStatus::PastDue)?;

        payment.status = PaymentStatus::PastDue;
        payment.updated_at = current_timestamp();
        self.store.update_payment_and_pointer(&payment, None).await?;

        warn!(
            subscription_id,
            payment_id = %payment.id,
            org_id = %payment.organization_id,
            "Renewal payment failed, subscription past due"
        );
        Ok(())
    }

    /// Refresh period bounds from a processor-side subscription update.
    ///
    /// Does not change status; renewals and failures arrive as their own
    /// events. Unknown fields are left as they were.
    #[instrument(skip(self))]
    pub async fn record_subscription_update(
        &self,
        subscription_id: &str,
        period_end: Option<u64>,
        cancel_at_period_end: Option<bool>,
    ) -> Result<()> {
        let mut payment = self.find_by_subscription(subscription_id).await?;
        if let Some(end) = period_end {
            payment.current_period_end = end;
        }
        if let Some(flag) = cancel_at_period_end {
            payment.cancel_at_period_end = flag;
        }
        payment.updated_at = current_timestamp();
        self.store.update_payment(&payment).await
    }

    /// Record a processor-side subscription deletion.
    #[instrument(skip(self))]
    pub async fn record_external_cancellation(&self, subscription_id: &str) -> Result<()> {
        let mut payment = self.find_by_subscription(subscription_id).await?;
        if matches!(
            payment.status,
            PaymentStatus::Cancelled | PaymentStatus::Expired
        ) {
            return Ok(());
        }
        check_transition(payment.status, PaymentStatus::Cancelled)?;

        payment.status = PaymentStatus::Cancelled;
        payment.updated_at = current_timestamp();
        self.store.update_payment_and_pointer(&payment, None).await?;

        info!(
            subscription_id,
            payment_id = %payment.id,
            "Subscription cancelled by processor"
        );
        Ok(())
    }

    /// Expire active subscriptions whose period has ended.
    ///
    /// Each expired organization lands on a fresh active free-plan row so
    /// it never has no governing subscription. Per-row failures are logged
    /// and skipped; the sweep is idempotent and the next run retries them.
    #[instrument(skip(self))]
    pub async fn sweep_expired(&self) -> Result<usize> {
        let now = current_timestamp();
        let expiring = self.store.list_active_payments_expiring(now).await?;
        let mut swept = 0;

        for payment in expiring {
            match self.expire_row(payment, now).await {
                Ok(()) => swept += 1,
                Err(err) => {
                    warn!(error = %err, "Failed to expire subscription row");
                }
            }
        }

        if swept > 0 {
            info!(swept, "Subscription expiry sweep completed");
        }
        Ok(swept)
    }

    /// Current subscription state for an organization.
    ///
    /// Expiry is applied at read time: an active row whose period has ended
    /// is reported expired even if the sweep has not reached it yet.
    pub async fn current_subscription(&self, org_id: &str) -> Result<SubscriptionView> {
        let Some(payment) = self.store.find_active_payment(org_id).await? else {
            return Ok(SubscriptionView {
                plan_name: "Free".to_string(),
                status: None,
                current_period_end: None,
                cancel_at_period_end: false,
            });
        };

        let status = if payment.is_period_over(current_timestamp()) {
            PaymentStatus::Expired
        } else {
            payment.status
        };
        Ok(SubscriptionView {
            plan_name: payment.plan_name,
            status: Some(status),
            current_period_end: Some(payment.current_period_end),
            cancel_at_period_end: payment.cancel_at_period_end,
        })
    }

    /// Payment history for the actor's organization, newest first.
    pub async fn payment_history(&self, actor: &Identity) -> Result<Vec<PaymentRecord>> {
        let organization = self.require_owner(actor).await?;
        self.store.list_payments(&organization.id).await
    }

    /// Whether the actor may manage this organization's billing.
    ///
    /// Lets a UI hide billing controls without triggering forbidden errors.
    pub async fn can_manage_billing(&self, actor: &Identity) -> Result<bool> {
        match self.require_owner(actor).await {
            Ok(_) => Ok(true),
            Err(CoreError::Forbidden(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Resolve a payment by its correlation handle without activating it.
    pub async fn find_checkout_payment(&self, payment_id: &str) -> Result<Option<PaymentRecord>> {
        self.store.find_payment(payment_id).await
    }

    /// Ownership check for billing operations. The role check alone is not
    /// enough: an invited super_admin must not control billing, so the
    /// organization's designated owner is verified too.
    async fn require_owner(&self, actor: &Identity) -> Result<OrganizationRecord> {
        actor.require(Capability::ManageBilling)?;
        let organization = self
            .store
            .find_org(&actor.organization_id)
            .await?
            .ok_or_else(|| {
                CoreError::not_found(format!("organization {}", actor.organization_id))
            })?;
        if organization.super_admin_id != actor.user_id {
            return Err(CoreError::forbidden(
                "only the organization owner may manage billing",
            ));
        }
        Ok(organization)
    }

    /// Resolve the catalog plan selling a processor price, and which cycle
    /// that price buys.
    async fn purchasable_plan(&self, price_id: &str) -> Result<(PricingPlanRecord, BillingCycle)> {
        let plan = self
            .store
            .find_plan_by_external_price(price_id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("price '{price_id}'")))?;
        if !plan.is_active {
            return Err(CoreError::validation(format!(
                "plan '{}' is not available for purchase",
                plan.name
            )));
        }
        let billing_cycle = if plan.external_price_id_monthly == price_id {
            BillingCycle::Monthly
        } else {
            BillingCycle::Yearly
        };
        Ok((plan, billing_cycle))
    }

    /// Refuse a plan switch that would leave the organization over the
    /// target plan's member limit.
    async fn check_member_fit(&self, org_id: &str, plan: &PricingPlanRecord) -> Result<()> {
        let Some(limit) = plan.member_limit else {
            return Ok(());
        };
        let members = self.store.count_active_users(org_id).await?;
        if members > limit {
            return Err(CoreError::capacity(plan.name.clone(), members, limit));
        }
        Ok(())
    }

    /// Cancel leftover pending rows superseded by a new attempt.
    async fn cancel_superseded_pending(&self, org_id: &str) -> Result<()> {
        for payment in self.store.list_payments(org_id).await? {
            if payment.status == PaymentStatus::Pending {
                self.mark_payment(&payment.id, PaymentStatus::Cancelled).await?;
            }
        }
        Ok(())
    }

    /// Cancel one row locally and, when externally linked, at the processor.
    async fn cancel_row(&self, mut payment: PaymentRecord) -> Result<()> {
        check_transition(payment.status, PaymentStatus::Cancelled)?;

        if let Some(subscription_id) = &payment.external_subscription_id {
            if let Err(err) = self.gateway.cancel_subscription(subscription_id).await {
                warn!(
                    subscription_id,
                    payment_id = %payment.id,
                    error = %err,
                    "Processor-side cancellation failed, cancelling locally anyway"
                );
            }
        }

        payment.status = PaymentStatus::Cancelled;
        payment.updated_at = current_timestamp();
        self.store.update_payment_and_pointer(&payment, None).await
    }

    async fn expire_row(&self, mut payment: PaymentRecord, now: u64) -> Result<()> {
        check_transition(payment.status, PaymentStatus::Expired)?;

        let was_free = payment.plan_name == "Free";
        let org_id = payment.organization_id.clone();
        let user_id = payment.user_id.clone();

        payment.status = PaymentStatus::Expired;
        payment.updated_at = now;
        self.store.update_payment_and_pointer(&payment, None).await?;

        info!(
            payment_id = %payment.id,
            org_id = %org_id,
            plan = %payment.plan_name,
            "Subscription expired"
        );

        // Land the organization on a fresh free-plan row. An expired free
        // row rolls into the next free period the same way.
        let free = self
            .store
            .find_plan_by_name("Free")
            .await?
            .ok_or_else(|| CoreError::not_found("free plan"))?;
        let replacement = PaymentRecord {
            id: Uuid::new_v4().to_string(),
            organization_id: org_id,
            user_id,
            plan_name: free.name.clone(),
            pricing_plan_id: Some(free.id.clone()),
            billing_cycle: BillingCycle::Monthly,
            external_subscription_id: None,
            external_customer_id: None,
            status: PaymentStatus::Active,
            current_period_start: now,
            current_period_end: now + free.duration_seconds(),
            cancel_at_period_end: false,
            created_at: now,
            updated_at: now,
        };
        self.store.create_payment(&replacement).await?;
        self.store
            .update_payment_and_pointer(&replacement, Some(replacement.id.clone()))
            .await?;

        if !was_free {
            info!(
                org_id = %replacement.organization_id,
                "Organization moved to free plan after expiry"
            );
        }
        Ok(())
    }

    async fn find_by_subscription(&self, subscription_id: &str) -> Result<PaymentRecord> {
        self.store
            .find_payment_by_external_subscription(subscription_id)
            .await?
            .ok_or_else(|| {
                CoreError::not_found(format!("subscription {subscription_id}"))
            })
    }

    /// Period length for a payment, from its catalog entry when resolvable.
    async fn period_length(&self, payment: &PaymentRecord) -> Result<u64> {
        let plan = match &payment.pricing_plan_id {
            Some(id) => self.store.find_plan(id).await?,
            None => self.store.find_plan_by_name(&payment.plan_name).await?,
        };
        // Missing catalog entry gets a conventional 30-day period
        Ok(plan.map_or(30 * 86_400, |p| p.duration_seconds()))
    }

    async fn mark_payment(&self, payment_id: &str, status: PaymentStatus) -> Result<()> {
        let mut payment = self
            .store
            .find_payment(payment_id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("payment {payment_id}")))?;
        check_transition(payment.status, status)?;
        payment.status = status;
        payment.updated_at = current_timestamp();
        self.store.update_payment(&payment).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::gateway::MockPaymentGateway;
    use crate::identity::Role;
    use crate::plans::default_catalog;
    use crate::storage::{InMemoryTenantStore, UserRecord};

    type TestManager = SubscriptionManager<InMemoryTenantStore, MockPaymentGateway>;

    async fn setup() -> (Arc<InMemoryTenantStore>, Arc<MockPaymentGateway>, TestManager, Identity)
    {
        let store = Arc::new(InMemoryTenantStore::new());
        store.seed_plans(default_catalog());
        let gateway = Arc::new(MockPaymentGateway::new());
        let manager = SubscriptionManager::new(
            Arc::clone(&store),
            Arc::clone(&gateway),
            BillingConfig::default(),
        );
        let owner = seed_org(&store, "org_1", "owner_1").await;
        (store, gateway, manager, owner)
    }

    async fn seed_org(store: &InMemoryTenantStore, org_id: &str, owner_id: &str) -> Identity {
        let now = current_timestamp();
        store
            .create_org(&OrganizationRecord {
                id: org_id.to_string(),
                name: format!("Org {org_id}"),
                slug: org_id.to_string(),
                super_admin_id: owner_id.to_string(),
                current_payment_id: None,
                created_at: now,
            })
            .await
            .unwrap();
        store
            .create_user(&UserRecord {
                id: owner_id.to_string(),
                full_name: "Owner".to_string(),
                email: format!("owner@{org_id}.com"),
                password_hash: "hash".to_string(),
                role: Role::SuperAdmin,
                is_active: true,
                is_invited: false,
                is_public_admin: true,
                organization_id: Some(org_id.to_string()),
                created_at: now,
            })
            .await
            .unwrap();
        Identity {
            user_id: owner_id.to_string(),
            organization_id: org_id.to_string(),
            role: Role::SuperAdmin,
            is_public_admin: true,
        }
    }

    async fn add_members(store: &InMemoryTenantStore, org_id: &str, count: usize) {
        let now = current_timestamp();
        for i in 0..count {
            store
                .create_user(&UserRecord {
                    id: format!("{org_id}_m{i}"),
                    full_name: format!("Member {i}"),
                    email: format!("m{i}@{org_id}.com"),
                    password_hash: "hash".to_string(),
                    role: Role::Member,
                    is_active: true,
                    is_invited: true,
                    is_public_admin: false,
                    organization_id: Some(org_id.to_string()),
                    created_at: now,
                })
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_checkout_creates_pending_row_with_correlation_handle() {
        let (store, gateway, manager, owner) = setup().await;

        let intent = manager
            .start_checkout(&owner, "price_pro_monthly")
            .await
            .unwrap();

        let payment = store.find_payment(&intent.payment_id).await.unwrap().unwrap();
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert_eq!(payment.plan_name, "Pro");

        let sessions = gateway.sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].client_reference_id, intent.payment_id);
        assert_eq!(sessions[0].price_id, "price_pro_monthly");
    }

    #[tokio::test]
    async fn test_unknown_price_is_not_found() {
        let (_store, _gateway, manager, owner) = setup().await;
        let err = manager
            .start_checkout(&owner, "price_unknown")
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_yearly_price_selects_yearly_cycle() {
        let (store, _gateway, manager, owner) = setup().await;

        let intent = manager
            .start_checkout(&owner, "price_pro_yearly")
            .await
            .unwrap();

        let payment = store.find_payment(&intent.payment_id).await.unwrap().unwrap();
        assert_eq!(payment.plan_name, "Pro");
        assert_eq!(payment.billing_cycle, BillingCycle::Yearly);
    }

    #[tokio::test]
    async fn test_non_owner_cannot_start_checkout() {
        let (_store, _gateway, manager, _owner) = setup().await;
        let admin = Identity {
            user_id: "a1".to_string(),
            organization_id: "org_1".to_string(),
            role: Role::Admin,
            is_public_admin: false,
        };

        let err = manager
            .start_checkout(&admin, "price_pro_monthly")
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_invited_super_admin_cannot_manage_billing() {
        let (_store, _gateway, manager, _owner) = setup().await;
        let invited = Identity {
            user_id: "other".to_string(),
            organization_id: "org_1".to_string(),
            role: Role::SuperAdmin,
            is_public_admin: false,
        };

        let err = manager.cancel_subscription(&invited).await.unwrap_err();
        assert!(matches!(err, CoreError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_gateway_failure_cancels_fresh_pending_row() {
        let (store, gateway, manager, owner) = setup().await;
        gateway.fail_checkout(true);

        let err = manager
            .start_checkout(&owner, "price_pro_monthly")
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ExternalService { .. }));

        // No pending rows left behind
        let pending = store
            .all_payments()
            .into_iter()
            .filter(|p| p.status == PaymentStatus::Pending)
            .count();
        assert_eq!(pending, 0);
    }

    #[tokio::test]
    async fn test_confirm_checkout_activates_and_sets_pointer() {
        let (store, _gateway, manager, owner) = setup().await;

        let intent = manager
            .start_checkout(&owner, "price_pro_monthly")
            .await
            .unwrap();
        manager
            .confirm_checkout(&intent.payment_id, "sub_1", "cus_1")
            .await
            .unwrap();

        let payment = store.find_payment(&intent.payment_id).await.unwrap().unwrap();
        assert_eq!(payment.status, PaymentStatus::Active);
        assert_eq!(payment.external_subscription_id.as_deref(), Some("sub_1"));

        let org = store.find_org("org_1").await.unwrap().unwrap();
        assert_eq!(org.current_payment_id.as_deref(), Some(intent.payment_id.as_str()));
    }

    #[tokio::test]
    async fn test_confirm_checkout_is_idempotent() {
        let (store, _gateway, manager, owner) = setup().await;

        let intent = manager
            .start_checkout(&owner, "price_pro_monthly")
            .await
            .unwrap();
        manager
            .confirm_checkout(&intent.payment_id, "sub_1", "cus_1")
            .await
            .unwrap();
        let first = store.find_payment(&intent.payment_id).await.unwrap().unwrap();

        manager
            .confirm_checkout(&intent.payment_id, "sub_1", "cus_1")
            .await
            .unwrap();
        let second = store.find_payment(&intent.payment_id).await.unwrap().unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_plan_switch_cancels_old_active_row() {
        let (store, gateway, manager, owner) = setup().await;

        let first = manager
            .start_checkout(&owner, "price_pro_monthly")
            .await
            .unwrap();
        manager
            .confirm_checkout(&first.payment_id, "sub_1", "cus_1")
            .await
            .unwrap();

        let second = manager
            .start_checkout(&owner, "price_team_monthly")
            .await
            .unwrap();
        manager
            .confirm_checkout(&second.payment_id, "sub_2", "cus_1")
            .await
            .unwrap();

        assert_eq!(store.active_payment_count("org_1"), 1);
        let old = store.find_payment(&first.payment_id).await.unwrap().unwrap();
        assert_eq!(old.status, PaymentStatus::Cancelled);
        // The old processor subscription was cancelled too
        assert_eq!(gateway.cancelled(), vec!["sub_1".to_string()]);
    }

    #[tokio::test]
    async fn test_downgrade_refused_over_free_limit() {
        let (store, _gateway, manager, owner) = setup().await;
        // Owner plus five members exceeds the four-seat free tier
        add_members(&store, "org_1", 5).await;

        let err = manager.downgrade_to_free(&owner).await.unwrap_err();
        match err {
            CoreError::Capacity { current, limit, .. } => {
                assert_eq!(current, 6);
                assert_eq!(limit, 4);
            }
            other => panic!("expected capacity error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_downgrade_cancels_paid_subscription() {
        let (store, gateway, manager, owner) = setup().await;

        let intent = manager
            .start_checkout(&owner, "price_pro_monthly")
            .await
            .unwrap();
        manager
            .confirm_checkout(&intent.payment_id, "sub_1", "cus_1")
            .await
            .unwrap();

        let free = manager.downgrade_to_free(&owner).await.unwrap();
        assert_eq!(free.plan_name, "Free");
        assert_eq!(store.active_payment_count("org_1"), 1);
        assert_eq!(gateway.cancelled(), vec!["sub_1".to_string()]);
    }

    #[tokio::test]
    async fn test_payment_failure_and_recovery() {
        let (store, _gateway, manager, owner) = setup().await;

        let intent = manager
            .start_checkout(&owner, "price_pro_monthly")
            .await
            .unwrap();
        manager
            .confirm_checkout(&intent.payment_id, "sub_1", "cus_1")
            .await
            .unwrap();

        manager.record_payment_failure("sub_1").await.unwrap();
        let payment = store.find_payment(&intent.payment_id).await.unwrap().unwrap();
        assert_eq!(payment.status, PaymentStatus::PastDue);
        // Past due stops governing the plan
        assert!(store.find_active_payment("org_1").await.unwrap().is_none());

        manager.record_renewal("sub_1", Some(current_timestamp() + 1000)).await.unwrap();
        let payment = store.find_payment(&intent.payment_id).await.unwrap().unwrap();
        assert_eq!(payment.status, PaymentStatus::Active);
        let org = store.find_org("org_1").await.unwrap().unwrap();
        assert_eq!(org.current_payment_id.as_deref(), Some(intent.payment_id.as_str()));
    }

    #[tokio::test]
    async fn test_sweep_expires_and_lands_on_free() {
        let (store, _gateway, manager, owner) = setup().await;

        let intent = manager
            .start_checkout(&owner, "price_pro_monthly")
            .await
            .unwrap();
        manager
            .confirm_checkout(&intent.payment_id, "sub_1", "cus_1")
            .await
            .unwrap();

        // Force the period into the past
        let mut payment = store.find_payment(&intent.payment_id).await.unwrap().unwrap();
        payment.current_period_end = current_timestamp() - 1;
        store.update_payment(&payment).await.unwrap();

        let swept = manager.sweep_expired().await.unwrap();
        assert_eq!(swept, 1);

        let old = store.find_payment(&intent.payment_id).await.unwrap().unwrap();
        assert_eq!(old.status, PaymentStatus::Expired);

        let active = store.find_active_payment("org_1").await.unwrap().unwrap();
        assert_eq!(active.plan_name, "Free");

        // A second sweep finds nothing to do
        assert_eq!(manager.sweep_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_current_subscription_applies_read_time_expiry() {
        let (store, _gateway, manager, owner) = setup().await;

        let intent = manager
            .start_checkout(&owner, "price_pro_monthly")
            .await
            .unwrap();
        manager
            .confirm_checkout(&intent.payment_id, "sub_1", "cus_1")
            .await
            .unwrap();

        let mut payment = store.find_payment(&intent.payment_id).await.unwrap().unwrap();
        payment.current_period_end = current_timestamp() - 1;
        store.update_payment(&payment).await.unwrap();

        let view = manager.current_subscription("org_1").await.unwrap();
        assert_eq!(view.status, Some(PaymentStatus::Expired));
    }

    #[tokio::test]
    async fn test_billing_visibility() {
        let (_store, _gateway, manager, owner) = setup().await;
        assert!(manager.can_manage_billing(&owner).await.unwrap());

        let admin = Identity {
            user_id: "a1".to_string(),
            organization_id: "org_1".to_string(),
            role: Role::Admin,
            is_public_admin: false,
        };
        assert!(!manager.can_manage_billing(&admin).await.unwrap());
    }

    #[tokio::test]
    async fn test_no_subscription_reports_free() {
        let (_store, _gateway, manager, _owner) = setup().await;
        let view = manager.current_subscription("org_1").await.unwrap();
        assert_eq!(view.plan_name, "Free");
        assert_eq!(view.status, None);
    }

    #[tokio::test]
    async fn test_payment_history_preserves_cancelled_rows() {
        let (_store, _gateway, manager, owner) = setup().await;

        let intent = manager
            .start_checkout(&owner, "price_pro_monthly")
            .await
            .unwrap();
        manager
            .confirm_checkout(&intent.payment_id, "sub_1", "cus_1")
            .await
            .unwrap();
        manager.downgrade_to_free(&owner).await.unwrap();

        let history = manager.payment_history(&owner).await.unwrap();
        assert_eq!(history.len(), 2);
        let pro = history.iter().find(|p| p.plan_name == "Pro").unwrap();
        let free = history.iter().find(|p| p.plan_name == "Free").unwrap();
        assert_eq!(pro.status, PaymentStatus::Cancelled);
        assert_eq!(free.status, PaymentStatus::Active);
    }
}
