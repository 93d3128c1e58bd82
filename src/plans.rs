//! Plan limits and seat accounting.
//!
//! The enforcer answers one question: can this organization take on N more
//! members right now? Committed capacity counts active users plus pending
//! unexpired invitations, so an outstanding offer reserves its seat until it
//! is accepted, revoked, or expires.

use crate::error::{CoreError, Result};
use crate::storage::{InvitationStore, PaymentStore, PlanStore, PricingPlanRecord, UserStore};
use crate::util::current_timestamp;
use std::sync::Arc;
use tracing::{instrument, warn};

/// Fallback member limit when the governing plan cannot be resolved.
///
/// Matches the Free tier. Resolution failures restrict rather than grant.
pub const FALLBACK_MEMBER_LIMIT: u32 = 4;

/// Point-in-time seat usage for an organization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeatUsage {
    /// Name of the governing plan.
    pub plan_name: String,
    /// Member limit of the governing plan; `None` means unbounded.
    pub member_limit: Option<u32>,
    /// Active users in the organization.
    pub active_members: u32,
    /// Pending unexpired invitations.
    pub pending_invitations: u32,
}

impl SeatUsage {
    /// Seats committed right now (members plus outstanding offers).
    #[must_use]
    pub fn committed(&self) -> u32 {
        self.active_members + self.pending_invitations
    }

    /// Seats still available, if the plan is bounded.
    #[must_use]
    pub fn remaining(&self) -> Option<u32> {
        self.member_limit
            .map(|limit| limit.saturating_sub(self.committed()))
    }
}

/// Enforces plan member limits against committed seat counts.
pub struct PlanEnforcer<S> {
    store: Arc<S>,
}

impl<S> Clone for PlanEnforcer<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S> PlanEnforcer<S>
where
    S: UserStore + InvitationStore + PaymentStore + PlanStore,
{
    /// Create an enforcer over a store.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Resolve the organization's governing plan name and member limit.
    ///
    /// No active payment means the Free tier governs. An active payment
    /// whose plan name is missing from the catalog resolves to the fallback
    /// limit rather than unbounded.
    #[instrument(skip(self))]
    pub async fn governing_plan(&self, org_id: &str) -> Result<(String, Option<u32>)> {
        let plan_name = match self.store.find_active_payment(org_id).await? {
            Some(payment) => payment.plan_name,
            None => "Free".to_string(),
        };

        match self.store.find_plan_by_name(&plan_name).await? {
            Some(plan) => Ok((plan_name, plan.member_limit)),
            None => {
                warn!(
                    org_id,
                    plan_name = %plan_name,
                    fallback = FALLBACK_MEMBER_LIMIT,
                    "plan not found in catalog, applying fallback limit"
                );
                Ok((plan_name, Some(FALLBACK_MEMBER_LIMIT)))
            }
        }
    }

    /// The member limit currently governing an organization, if bounded.
    pub async fn seat_limit(&self, org_id: &str) -> Result<Option<u32>> {
        let (_, limit) = self.governing_plan(org_id).await?;
        Ok(limit)
    }

    /// Compute current seat usage for an organization.
    #[instrument(skip(self))]
    pub async fn seat_usage(&self, org_id: &str) -> Result<SeatUsage> {
        let (plan_name, member_limit) = self.governing_plan(org_id).await?;
        let now = current_timestamp();
        let active_members = self.store.count_active_users(org_id).await?;
        let pending_invitations = self.store.count_pending_invitations(org_id, now).await?;

        Ok(SeatUsage {
            plan_name,
            member_limit,
            active_members,
            pending_invitations,
        })
    }

    /// Check whether the organization can commit `additional` more seats.
    ///
    /// Returns a capacity error naming the plan, the committed count, and
    /// the limit when the answer is no. The check and the subsequent insert
    /// are not atomic; the storage layer's uniqueness constraints keep a
    /// lost race from admitting duplicates, and a small overshoot under
    /// racing distinct emails is accepted.
    #[instrument(skip(self))]
    pub async fn check_capacity(&self, org_id: &str, additional: u32) -> Result<()> {
        let usage = self.seat_usage(org_id).await?;
        let Some(limit) = usage.member_limit else {
            return Ok(());
        };

        let committed = usage.committed();
        if committed + additional > limit {
            return Err(CoreError::capacity(usage.plan_name, committed, limit));
        }
        Ok(())
    }
}

/// The default plan catalog.
///
/// Free seats four members at no charge, Pro seats eleven, Team is
/// unbounded. All plans run 30-day periods.
#[must_use]
pub fn default_catalog() -> Vec<PricingPlanRecord> {
    vec![
        PricingPlanRecord {
            id: "plan_free".to_string(),
            name: "Free".to_string(),
            slug: "free".to_string(),
            member_limit: Some(4),
            price_monthly: 0.0,
            price_yearly: 0.0,
            description: "For small teams getting started".to_string(),
            duration_days: 30,
            external_price_id_monthly: "price_free_monthly".to_string(),
            external_price_id_yearly: "price_free_yearly".to_string(),
            is_active: true,
        },
        PricingPlanRecord {
            id: "plan_pro".to_string(),
            name: "Pro".to_string(),
            slug: "pro".to_string(),
            member_limit: Some(11),
            price_monthly: 29.0,
            price_yearly: 290.0,
            description: "For growing teams".to_string(),
            duration_days: 30,
            external_price_id_monthly: "price_pro_monthly".to_string(),
            external_price_id_yearly: "price_pro_yearly".to_string(),
            is_active: true,
        },
        PricingPlanRecord {
            id: "plan_team".to_string(),
            name: "Team".to_string(),
            slug: "team".to_string(),
            member_limit: None,
            price_monthly: 99.0,
            price_yearly: 990.0,
            description: "For organizations of any size".to_string(),
            duration_days: 30,
            external_price_id_monthly: "price_team_monthly".to_string(),
            external_price_id_yearly: "price_team_yearly".to_string(),
            is_active: true,
        },
    ]
}
