//! In-memory tenant store.
//!
//! Backs tests and development. Cloning shares the same underlying data
//! (uses `Arc` internally). Enforces the same uniqueness constraints a
//! relational implementation would, returning conflicts where a database
//! would raise a unique-constraint violation.

use super::records::{
    InvitationRecord, OrganizationRecord, PaymentRecord, PaymentStatus, PricingPlanRecord,
    UserRecord, WebhookEventRecord,
};
use super::traits::{
    InvitationStore, OrganizationStore, PaymentStore, PlanStore, UserStore, WebhookLedger,
};
use crate::error::{CoreError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[derive(Default)]
struct InMemoryTenantStoreInner {
    orgs: RwLock<HashMap<String, OrganizationRecord>>,
    users: RwLock<HashMap<String, UserRecord>>,
    invitations: RwLock<HashMap<String, InvitationRecord>>,
    payments: RwLock<HashMap<String, PaymentRecord>>,
    plans: RwLock<HashMap<String, PricingPlanRecord>>,
    webhook_events: RwLock<HashMap<String, WebhookEventRecord>>,
}

/// In-memory store implementing all tenant storage traits.
#[derive(Default, Clone)]
pub struct InMemoryTenantStore {
    inner: Arc<InMemoryTenantStoreInner>,
}

impl InMemoryTenantStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed catalog entries.
    pub fn seed_plans(&self, plans: Vec<PricingPlanRecord>) {
        let mut store = self.inner.plans.write().unwrap();
        for plan in plans {
            store.insert(plan.id.clone(), plan);
        }
    }

    /// Get all payments (for test assertions).
    pub fn all_payments(&self) -> Vec<PaymentRecord> {
        self.inner.payments.read().unwrap().values().cloned().collect()
    }

    /// Count active payments for an organization (for invariant checks in
    /// tests).
    pub fn active_payment_count(&self, org_id: &str) -> usize {
        self.inner
            .payments
            .read()
            .unwrap()
            .values()
            .filter(|p| p.organization_id == org_id && p.status == PaymentStatus::Active)
            .count()
    }
}

#[async_trait]
impl OrganizationStore for InMemoryTenantStore {
    async fn create_org(&self, org: &OrganizationRecord) -> Result<()> {
        let mut orgs = self.inner.orgs.write().unwrap();
        if orgs.values().any(|o| o.slug == org.slug) {
            return Err(CoreError::conflict(format!(
                "organization slug '{}' is already taken",
                org.slug
            )));
        }
        orgs.insert(org.id.clone(), org.clone());
        Ok(())
    }

    async fn find_org(&self, id: &str) -> Result<Option<OrganizationRecord>> {
        Ok(self.inner.orgs.read().unwrap().get(id).cloned())
    }
}

#[async_trait]
impl UserStore for InMemoryTenantStore {
    async fn create_user(&self, user: &UserRecord) -> Result<()> {
        let mut users = self.inner.users.write().unwrap();
        if let Some(org_id) = &user.organization_id {
            let duplicate = users.values().any(|u| {
                u.organization_id.as_deref() == Some(org_id.as_str()) && u.email == user.email
            });
            if duplicate {
                return Err(CoreError::conflict(format!(
                    "a user with email '{}' already exists in this organization",
                    user.email
                )));
            }
        }
        users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn find_user(&self, id: &str) -> Result<Option<UserRecord>> {
        Ok(self.inner.users.read().unwrap().get(id).cloned())
    }

    async fn find_user_by_email(&self, org_id: &str, email: &str) -> Result<Option<UserRecord>> {
        Ok(self
            .inner
            .users
            .read()
            .unwrap()
            .values()
            .find(|u| u.organization_id.as_deref() == Some(org_id) && u.email == email)
            .cloned())
    }

    async fn update_user(&self, user: &UserRecord) -> Result<()> {
        let mut users = self.inner.users.write().unwrap();
        if !users.contains_key(&user.id) {
            return Err(CoreError::not_found(format!("user {}", user.id)));
        }
        users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn count_active_users(&self, org_id: &str) -> Result<u32> {
        Ok(self
            .inner
            .users
            .read()
            .unwrap()
            .values()
            .filter(|u| u.organization_id.as_deref() == Some(org_id) && u.is_active)
            .count() as u32)
    }

    async fn list_users(&self, org_id: &str) -> Result<Vec<UserRecord>> {
        let mut users: Vec<UserRecord> = self
            .inner
            .users
            .read()
            .unwrap()
            .values()
            .filter(|u| u.organization_id.as_deref() == Some(org_id))
            .cloned()
            .collect();
        users.sort_by(|a, b| a.full_name.cmp(&b.full_name).then(a.email.cmp(&b.email)));
        Ok(users)
    }
}

#[async_trait]
impl InvitationStore for InMemoryTenantStore {
    async fn create_invitation(&self, invitation: &InvitationRecord) -> Result<()> {
        let mut invitations = self.inner.invitations.write().unwrap();
        let duplicate_email = invitations.values().any(|i| {
            i.organization_id == invitation.organization_id && i.email == invitation.email
        });
        if duplicate_email {
            return Err(CoreError::conflict(format!(
                "an invitation for '{}' already exists in this organization",
                invitation.email
            )));
        }
        if invitations.values().any(|i| i.token == invitation.token) {
            return Err(CoreError::conflict("invitation token collision"));
        }
        invitations.insert(invitation.id.clone(), invitation.clone());
        Ok(())
    }

    async fn find_invitation_by_token(&self, token: &str) -> Result<Option<InvitationRecord>> {
        Ok(self
            .inner
            .invitations
            .read()
            .unwrap()
            .values()
            .find(|i| i.token == token)
            .cloned())
    }

    async fn find_invitation(&self, id: &str) -> Result<Option<InvitationRecord>> {
        Ok(self.inner.invitations.read().unwrap().get(id).cloned())
    }

    async fn find_invitation_by_email(
        &self,
        org_id: &str,
        email: &str,
    ) -> Result<Option<InvitationRecord>> {
        Ok(self
            .inner
            .invitations
            .read()
            .unwrap()
            .values()
            .find(|i| i.organization_id == org_id && i.email == email)
            .cloned())
    }

    async fn list_pending_invitations(
        &self,
        org_id: &str,
        now: u64,
    ) -> Result<Vec<InvitationRecord>> {
        Ok(self
            .inner
            .invitations
            .read()
            .unwrap()
            .values()
            .filter(|i| i.organization_id == org_id && i.is_pending(now))
            .cloned()
            .collect())
    }

    async fn list_invitations_sent_by(&self, user_id: &str) -> Result<Vec<InvitationRecord>> {
        let mut sent: Vec<InvitationRecord> = self
            .inner
            .invitations
            .read()
            .unwrap()
            .values()
            .filter(|i| i.sent_by_id == user_id)
            .cloned()
            .collect();
        sent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sent)
    }

    async fn mark_invitation_accepted(&self, id: &str, now: u64) -> Result<()> {
        let mut invitations = self.inner.invitations.write().unwrap();
        let invitation = invitations
            .get_mut(id)
            .ok_or_else(|| CoreError::not_found(format!("invitation {id}")))?;
        invitation.accepted = true;
        invitation.accepted_at = Some(now);
        Ok(())
    }

    async fn update_invitation(&self, invitation: &InvitationRecord) -> Result<()> {
        let mut invitations = self.inner.invitations.write().unwrap();
        if !invitations.contains_key(&invitation.id) {
            return Err(CoreError::not_found(format!("invitation {}", invitation.id)));
        }
        invitations.insert(invitation.id.clone(), invitation.clone());
        Ok(())
    }

    async fn delete_invitation(&self, id: &str) -> Result<()> {
        self.inner.invitations.write().unwrap().remove(id);
        Ok(())
    }
}

#[async_trait]
impl PaymentStore for InMemoryTenantStore {
    async fn create_payment(&self, payment: &PaymentRecord) -> Result<()> {
        self.inner
            .payments
            .write()
            .unwrap()
            .insert(payment.id.clone(), payment.clone());
        Ok(())
    }

    async fn find_payment(&self, id: &str) -> Result<Option<PaymentRecord>> {
        Ok(self.inner.payments.read().unwrap().get(id).cloned())
    }

    async fn find_active_payment(&self, org_id: &str) -> Result<Option<PaymentRecord>> {
        let payments = self.inner.payments.read().unwrap();
        let mut active: Vec<&PaymentRecord> = payments
            .values()
            .filter(|p| p.organization_id == org_id && p.status == PaymentStatus::Active)
            .collect();
        if active.len() > 1 {
            return Err(CoreError::internal(format!(
                "{} active payments found for organization {org_id}",
                active.len()
            )));
        }
        Ok(active.pop().cloned())
    }

    async fn find_payment_by_external_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<Option<PaymentRecord>> {
        Ok(self
            .inner
            .payments
            .read()
            .unwrap()
            .values()
            .find(|p| p.external_subscription_id.as_deref() == Some(subscription_id))
            .cloned())
    }

    async fn update_payment(&self, payment: &PaymentRecord) -> Result<()> {
        let mut payments = self.inner.payments.write().unwrap();
        if !payments.contains_key(&payment.id) {
            return Err(CoreError::not_found(format!("payment {}", payment.id)));
        }
        payments.insert(payment.id.clone(), payment.clone());
        Ok(())
    }

    async fn update_payment_and_pointer(
        &self,
        payment: &PaymentRecord,
        current_payment_id: Option<String>,
    ) -> Result<()> {
        // Both maps are locked for the duration, standing in for the single
        // transaction a relational implementation would use.
        let mut payments = self.inner.payments.write().unwrap();
        let mut orgs = self.inner.orgs.write().unwrap();

        if !payments.contains_key(&payment.id) {
            return Err(CoreError::not_found(format!("payment {}", payment.id)));
        }
        let org = orgs
            .get_mut(&payment.organization_id)
            .ok_or_else(|| CoreError::not_found(format!("organization {}", payment.organization_id)))?;

        payments.insert(payment.id.clone(), payment.clone());
        org.current_payment_id = current_payment_id;
        Ok(())
    }

    async fn list_payments(&self, org_id: &str) -> Result<Vec<PaymentRecord>> {
        let mut payments: Vec<PaymentRecord> = self
            .inner
            .payments
            .read()
            .unwrap()
            .values()
            .filter(|p| p.organization_id == org_id)
            .cloned()
            .collect();
        payments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(payments)
    }

    async fn list_active_payments_expiring(&self, now: u64) -> Result<Vec<PaymentRecord>> {
        Ok(self
            .inner
            .payments
            .read()
            .unwrap()
            .values()
            .filter(|p| p.status == PaymentStatus::Active && p.is_period_over(now))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PlanStore for InMemoryTenantStore {
    async fn create_plan(&self, plan: &PricingPlanRecord) -> Result<()> {
        self.inner
            .plans
            .write()
            .unwrap()
            .insert(plan.id.clone(), plan.clone());
        Ok(())
    }

    async fn find_plan(&self, id: &str) -> Result<Option<PricingPlanRecord>> {
        Ok(self.inner.plans.read().unwrap().get(id).cloned())
    }

    async fn find_plan_by_name(&self, name: &str) -> Result<Option<PricingPlanRecord>> {
        Ok(self
            .inner
            .plans
            .read()
            .unwrap()
            .values()
            .find(|p| p.name == name)
            .cloned())
    }

    async fn find_plan_by_external_price(
        &self,
        price_id: &str,
    ) -> Result<Option<PricingPlanRecord>> {
        Ok(self
            .inner
            .plans
            .read()
            .unwrap()
            .values()
            .find(|p| {
                p.external_price_id_monthly == price_id || p.external_price_id_yearly == price_id
            })
            .cloned())
    }

    async fn list_plans(&self) -> Result<Vec<PricingPlanRecord>> {
        let mut plans: Vec<PricingPlanRecord> = self
            .inner
            .plans
            .read()
            .unwrap()
            .values()
            .filter(|p| p.is_active)
            .cloned()
            .collect();
        plans.sort_by(|a, b| {
            a.price_monthly
                .partial_cmp(&b.price_monthly)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(plans)
    }
}

#[async_trait]
impl WebhookLedger for InMemoryTenantStore {
    async fn find_event(&self, external_event_id: &str) -> Result<Option<WebhookEventRecord>> {
        Ok(self
            .inner
            .webhook_events
            .read()
            .unwrap()
            .get(external_event_id)
            .cloned())
    }

    async fn record_event(&self, event: &WebhookEventRecord) -> Result<()> {
        let mut events = self.inner.webhook_events.write().unwrap();
        if events.contains_key(&event.external_event_id) {
            return Err(CoreError::conflict(format!(
                "webhook event '{}' already recorded",
                event.external_event_id
            )));
        }
        events.insert(event.external_event_id.clone(), event.clone());
        Ok(())
    }

    async fn mark_event(
        &self,
        external_event_id: &str,
        processed: bool,
        processing_error: Option<String>,
    ) -> Result<()> {
        let mut events = self.inner.webhook_events.write().unwrap();
        let event = events
            .get_mut(external_event_id)
            .ok_or_else(|| CoreError::not_found(format!("webhook event {external_event_id}")))?;
        event.processed = processed;
        event.processing_error = processing_error;
        Ok(())
    }
}
