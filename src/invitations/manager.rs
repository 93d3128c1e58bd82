//! Invitation manager.
//!
//! Owns the full invitation lifecycle. The ordering rule throughout is
//! persist first, notify second: a created or rotated invitation is durable
//! before any delivery is attempted, and delivery failure degrades the
//! result instead of failing the operation.

use crate::config::InvitationConfig;
use crate::credentials::CredentialIssuer;
use crate::error::{CoreError, Result};
use crate::identity::{Capability, Identity, Role};
use crate::notify::{InvitationNotice, NotificationSender};
use crate::plans::PlanEnforcer;
use crate::storage::{
    InvitationRecord, InvitationStore, OrganizationStore, PaymentStore, PlanStore, UserRecord,
    UserStore,
};
use crate::util::{current_timestamp, generate_secure_token, is_valid_email};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Outcome of the notification attempt for a created or resent invitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// The notice was handed off successfully.
    Sent,
    /// Delivery failed or timed out. The invitation is still valid; the
    /// token can be re-delivered with a resend.
    Failed,
}

/// A persisted invitation together with its delivery outcome.
#[derive(Debug, Clone)]
pub struct InvitationOutcome {
    /// The persisted invitation.
    pub invitation: InvitationRecord,
    /// Whether the notice reached the delivery backend.
    pub delivery: DeliveryStatus,
}

/// Result of accepting an invitation.
#[derive(Debug, Clone)]
pub struct AcceptedMember {
    /// The newly created member.
    pub user: UserRecord,
    /// The organization joined.
    pub organization_id: String,
    /// Opaque session credential for the new member, so acceptance leaves
    /// them signed in.
    pub session_credential: String,
}

/// Invitation manager.
///
/// # Example
///
/// ```rust,ignore
/// use seatkeeper::{InvitationManager, InvitationConfig, PlanEnforcer};
///
/// let manager = InvitationManager::new(
///     store,
///     notifier,
///     credential_issuer,
///     InvitationConfig::default(),
/// );
///
/// let outcome = manager
///     .create_invitation(&actor, "newuser@example.com", Role::Member)
///     .await?;
/// ```
pub struct InvitationManager<S, N, C> {
    store: Arc<S>,
    notifier: Arc<N>,
    credentials: Arc<C>,
    enforcer: PlanEnforcer<S>,
    config: InvitationConfig,
}

impl<S, N, C> InvitationManager<S, N, C>
where
    S: OrganizationStore + UserStore + InvitationStore + PaymentStore + PlanStore,
    N: NotificationSender,
    C: CredentialIssuer,
{
    /// Create a new invitation manager.
    pub fn new(store: Arc<S>, notifier: Arc<N>, credentials: Arc<C>, config: InvitationConfig) -> Self {
        let enforcer = PlanEnforcer::new(Arc::clone(&store));
        Self {
            store,
            notifier,
            credentials,
            enforcer,
            config,
        }
    }

    /// Get a reference to the configuration.
    pub fn config(&self) -> &InvitationConfig {
        &self.config
    }

    /// Get the seat enforcer.
    pub fn enforcer(&self) -> &PlanEnforcer<S> {
        &self.enforcer
    }

    /// Create an invitation and attempt delivery.
    ///
    /// Checks actor permission, email validity, duplicates against both
    /// members and outstanding invitations, and seat capacity with the
    /// candidate counted. A stale row for the same email (expired, or
    /// accepted by a user who has since left) is cleared and replaced.
    #[instrument(skip(self, actor), fields(org_id = %actor.organization_id, actor_id = %actor.user_id))]
    pub async fn create_invitation(
        &self,
        actor: &Identity,
        email: &str,
        role: Role,
    ) -> Result<InvitationOutcome> {
        actor.require(Capability::ManageMembers)?;

        let email = email.trim().to_lowercase();
        if !is_valid_email(&email) {
            return Err(CoreError::validation(format!("invalid email address '{email}'")));
        }
        if role == Role::SuperAdmin {
            return Err(CoreError::validation(
                "the super_admin role cannot be granted by invitation",
            ));
        }

        let org_id = actor.organization_id.as_str();
        let organization = self
            .store
            .find_org(org_id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("organization {org_id}")))?;

        // Refuse if the email already belongs to a member
        if let Some(existing) = self.store.find_user_by_email(org_id, &email).await? {
            if existing.is_active {
                return Err(CoreError::conflict(format!(
                    "'{email}' is already a member of this organization"
                )));
            }
        }

        let now = current_timestamp();

        // Clear stale rows so the email can be re-offered; refuse if a live
        // offer is already out
        if let Some(existing) = self.store.find_invitation_by_email(org_id, &email).await? {
            if existing.is_pending(now) {
                return Err(CoreError::conflict(format!(
                    "an invitation for '{email}' is already pending"
                )));
            }
            if existing.accepted && self.accepted_user_still_member(org_id, &email).await? {
                return Err(CoreError::conflict(format!(
                    "'{email}' has already accepted an invitation"
                )));
            }
            self.store.delete_invitation(&existing.id).await?;
            info!(invitation_id = %existing.id, email = %email, "Stale invitation cleared");
        }

        // Candidate counts against the limit alongside members and
        // outstanding offers
        self.enforcer.check_capacity(org_id, 1).await?;

        let invitation = InvitationRecord {
            id: Uuid::new_v4().to_string(),
            email: email.clone(),
            token: generate_secure_token(),
            role,
            expires_at: now + self.config.expiry_seconds(),
            created_at: now,
            sent_by_id: actor.user_id.clone(),
            organization_id: org_id.to_string(),
            accepted: false,
            accepted_at: None,
        };

        self.store.create_invitation(&invitation).await?;

        info!(
            invitation_id = %invitation.id,
            email = %email,
            role = %role,
            "Invitation created"
        );

        let inviter_name = match self.store.find_user(&actor.user_id).await? {
            Some(user) => user.full_name,
            None => "A teammate".to_string(),
        };
        let delivery = self
            .deliver(&invitation, &organization.name, &inviter_name)
            .await;

        Ok(InvitationOutcome { invitation, delivery })
    }

    /// Validate a token, returning the invitation if it is still pending.
    ///
    /// Errors distinguish an unknown token, an already accepted one, and an
    /// expired one so a join page can show the right message.
    #[instrument(skip(self, token))]
    pub async fn validate_token(&self, token: &str) -> Result<InvitationRecord> {
        let invitation = self
            .store
            .find_invitation_by_token(token)
            .await?
            .ok_or_else(|| CoreError::not_found("invitation"))?;

        if invitation.accepted {
            return Err(CoreError::conflict("invitation has already been accepted"));
        }
        if invitation.is_expired(current_timestamp()) {
            return Err(CoreError::validation("invitation has expired"));
        }
        Ok(invitation)
    }

    /// Accept an invitation, creating the member account.
    ///
    /// The user row is the point of no return: once it exists, acceptance
    /// has happened, and a failure to flip the invitation flag afterwards is
    /// logged but never unwinds the account.
    #[instrument(skip(self, token, password))]
    pub async fn accept_invitation(
        &self,
        token: &str,
        full_name: &str,
        password: &str,
    ) -> Result<AcceptedMember> {
        let invitation = self.validate_token(token).await?;
        let org_id = invitation.organization_id.clone();

        let full_name = full_name.trim();
        if full_name.is_empty() {
            return Err(CoreError::validation("full name is required"));
        }
        if password.len() < 8 {
            return Err(CoreError::validation(
                "password must be at least 8 characters",
            ));
        }

        if let Some(existing) = self
            .store
            .find_user_by_email(&org_id, &invitation.email)
            .await?
        {
            if existing.is_active {
                return Err(CoreError::conflict(
                    "an account for this email already exists in the organization",
                ));
            }
        }

        let now = current_timestamp();
        let password_hash = self.credentials.hash_password(password).await?;
        let user = UserRecord {
            id: Uuid::new_v4().to_string(),
            full_name: full_name.to_string(),
            email: invitation.email.clone(),
            password_hash,
            role: invitation.role,
            is_active: true,
            is_invited: true,
            is_public_admin: false,
            organization_id: Some(org_id.clone()),
            created_at: now,
        };

        // The unique (organization, email) constraint is what decides a race
        // between two holders of the same token: exactly one insert wins
        if let Err(err) = self.store.create_user(&user).await {
            return Err(match err {
                CoreError::Conflict(_) => {
                    CoreError::conflict("invitation has already been accepted")
                }
                other => other,
            });
        }

        if let Err(err) = self.store.mark_invitation_accepted(&invitation.id, now).await {
            warn!(
                invitation_id = %invitation.id,
                error = %err,
                "Failed to flag invitation accepted after member creation"
            );
        }

        let session_credential = self.credentials.issue_session(&user.id).await?;

        info!(
            invitation_id = %invitation.id,
            user_id = %user.id,
            org_id = %org_id,
            "Invitation accepted"
        );

        Ok(AcceptedMember {
            user,
            organization_id: org_id,
            session_credential,
        })
    }

    /// Rotate a pending invitation's token and expiry, then re-deliver.
    ///
    /// Only a pending unexpired invitation can be resent. An expired offer
    /// no longer reserves its seat, so reviving it goes back through
    /// `create_invitation` and its capacity check.
    #[instrument(skip(self, actor), fields(org_id = %actor.organization_id, actor_id = %actor.user_id))]
    pub async fn resend_invitation(
        &self,
        actor: &Identity,
        email: &str,
    ) -> Result<InvitationOutcome> {
        actor.require(Capability::ManageMembers)?;

        let email = email.trim().to_lowercase();
        let now = current_timestamp();
        let mut invitation = self
            .store
            .find_invitation_by_email(&actor.organization_id, &email)
            .await?
            .filter(|i| i.is_pending(now))
            .ok_or_else(|| CoreError::not_found(format!("pending invitation for '{email}'")))?;

        invitation.token = generate_secure_token();
        invitation.expires_at = now + self.config.expiry_seconds();
        self.store.update_invitation(&invitation).await?;

        info!(invitation_id = %invitation.id, email = %email, "Invitation resent");

        let organization = self
            .store
            .find_org(&invitation.organization_id)
            .await?
            .ok_or_else(|| CoreError::not_found("organization"))?;
        let inviter_name = match self.store.find_user(&actor.user_id).await? {
            Some(user) => user.full_name,
            None => "A teammate".to_string(),
        };
        let delivery = self
            .deliver(&invitation, &organization.name, &inviter_name)
            .await;

        Ok(InvitationOutcome { invitation, delivery })
    }

    /// Revoke a pending invitation. The row is deleted and its seat freed.
    #[instrument(skip(self, actor), fields(actor_id = %actor.user_id))]
    pub async fn revoke_invitation(&self, actor: &Identity, invitation_id: &str) -> Result<()> {
        actor.require(Capability::ManageMembers)?;

        let invitation = self.find_in_org(actor, invitation_id).await?;
        if invitation.accepted {
            return Err(CoreError::conflict(
                "an accepted invitation cannot be revoked",
            ));
        }

        self.store.delete_invitation(invitation_id).await?;
        info!(invitation_id, email = %invitation.email, "Invitation revoked");
        Ok(())
    }

    /// List pending invitations in the actor's organization.
    pub async fn list_pending(&self, actor: &Identity) -> Result<Vec<InvitationRecord>> {
        actor.require(Capability::ManageMembers)?;
        self.store
            .list_pending_invitations(&actor.organization_id, current_timestamp())
            .await
    }

    /// List invitations the actor has sent, newest first.
    pub async fn list_sent(&self, actor: &Identity) -> Result<Vec<InvitationRecord>> {
        self.store.list_invitations_sent_by(&actor.user_id).await
    }

    /// List members of the actor's organization.
    pub async fn organization_members(&self, actor: &Identity) -> Result<Vec<UserRecord>> {
        self.store.list_users(&actor.organization_id).await
    }

    /// Remove a member from the actor's organization.
    ///
    /// Removal is soft: the user row survives with its organization link
    /// cleared, freeing the seat without destroying account history. The
    /// organization owner cannot be removed.
    #[instrument(skip(self, actor), fields(org_id = %actor.organization_id, actor_id = %actor.user_id))]
    pub async fn remove_member(&self, actor: &Identity, user_id: &str) -> Result<()> {
        actor.require(Capability::ManageMembers)?;

        if user_id == actor.user_id {
            return Err(CoreError::validation("you cannot remove yourself"));
        }

        let mut user = self
            .store
            .find_user(user_id)
            .await?
            .filter(|u| u.organization_id.as_deref() == Some(actor.organization_id.as_str()))
            .ok_or_else(|| CoreError::not_found(format!("member {user_id}")))?;

        if user.role == Role::SuperAdmin {
            return Err(CoreError::forbidden(
                "the organization owner cannot be removed",
            ));
        }

        user.organization_id = None;
        user.is_active = false;
        self.store.update_user(&user).await?;

        info!(user_id, email = %user.email, "Member removed");
        Ok(())
    }

    /// Build the activation link for an invitation token.
    fn activation_link(&self, token: &str) -> String {
        format!("{}?token={token}", self.config.activation_base_url)
    }

    /// Whether the user who accepted an invitation for `email` is still an
    /// active member. False means the accepted row is stale and may be
    /// cleared.
    async fn accepted_user_still_member(&self, org_id: &str, email: &str) -> Result<bool> {
        Ok(self
            .store
            .find_user_by_email(org_id, email)
            .await?
            .map(|u| u.is_active)
            .unwrap_or(false))
    }

    /// Attempt delivery with a timeout. Failure is degraded, not fatal.
    async fn deliver(
        &self,
        invitation: &InvitationRecord,
        organization_name: &str,
        inviter_name: &str,
    ) -> DeliveryStatus {
        let notice = InvitationNotice {
            email: invitation.email.clone(),
            organization_name: organization_name.to_string(),
            inviter_name: inviter_name.to_string(),
            activation_link: self.activation_link(&invitation.token),
            expires_at: invitation.expires_at,
        };

        match tokio::time::timeout(
            self.config.notify_timeout,
            self.notifier.send_invitation(&notice),
        )
        .await
        {
            Ok(Ok(())) => DeliveryStatus::Sent,
            Ok(Err(err)) => {
                warn!(
                    invitation_id = %invitation.id,
                    email = %invitation.email,
                    error = %err,
                    "Invitation notice delivery failed"
                );
                DeliveryStatus::Failed
            }
            Err(_) => {
                warn!(
                    invitation_id = %invitation.id,
                    email = %invitation.email,
                    "Invitation notice delivery timed out"
                );
                DeliveryStatus::Failed
            }
        }
    }

    /// Find an invitation scoped to the actor's organization. A row in
    /// another organization is indistinguishable from a missing one.
    async fn find_in_org(&self, actor: &Identity, invitation_id: &str) -> Result<InvitationRecord> {
        self.store
            .find_invitation(invitation_id)
            .await?
            .filter(|i| i.organization_id == actor.organization_id)
            .ok_or_else(|| CoreError::not_found(format!("invitation {invitation_id}")))
    }
}
