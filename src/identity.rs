//! Caller identity and capability checks.
//!
//! The surrounding HTTP layer resolves a session token into an [`Identity`];
//! this module owns the policy of what each role may do. Role checks happen
//! in one place ([`Identity::require`]) rather than being repeated inline at
//! call sites, so policy changes land in a single function.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};

/// Role of a user within an organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Tenant owner role. Only ever created via public signup.
    SuperAdmin,
    /// Administrator, may manage members and invitations.
    Admin,
    /// Regular member.
    Member,
}

impl Role {
    /// Parse from the stored string form.
    #[must_use]
    pub fn from_str_or_member(s: &str) -> Self {
        match s {
            "super_admin" => Self::SuperAdmin,
            "admin" => Self::Admin,
            _ => Self::Member,
        }
    }

    /// Convert to the stored string form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SuperAdmin => "super_admin",
            Self::Admin => "admin",
            Self::Member => "member",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Actions gated by role or ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Create, resend, or revoke invitations; remove members.
    ManageMembers,
    /// Upgrade, downgrade, or cancel the organization's subscription.
    /// Requires tenant ownership, not just an admin role, because invited
    /// admins must not be able to alter billing.
    ManageBilling,
}

/// An authenticated caller, as resolved by the credential service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// User ID.
    pub user_id: String,
    /// Organization the session is scoped to.
    pub organization_id: String,
    /// Role within that organization.
    pub role: Role,
    /// True only for the original tenant-creating signup.
    pub is_public_admin: bool,
}

impl Identity {
    /// Check whether this identity holds a capability.
    ///
    /// `ManageBilling` additionally requires the caller to be the
    /// organization's designated owner; callers must verify
    /// `organization.super_admin_id` matches separately since this type does
    /// not see storage.
    #[must_use]
    pub fn has_capability(&self, capability: Capability) -> bool {
        match capability {
            Capability::ManageMembers => {
                matches!(self.role, Role::Admin | Role::SuperAdmin)
            }
            Capability::ManageBilling => {
                self.role == Role::SuperAdmin && self.is_public_admin
            }
        }
    }

    /// Require a capability, returning `Forbidden` if absent.
    pub fn require(&self, capability: Capability) -> Result<()> {
        if self.has_capability(capability) {
            Ok(())
        } else {
            let action = match capability {
                Capability::ManageMembers => "manage members",
                Capability::ManageBilling => "manage billing",
            };
            Err(CoreError::forbidden(format!(
                "role '{}' may not {action}",
                self.role
            )))
        }
    }
}
