//! Invitation lifecycle: create, validate, accept, resend, revoke, and
//! membership maintenance.

mod manager;

pub use manager::{AcceptedMember, DeliveryStatus, InvitationManager, InvitationOutcome};
