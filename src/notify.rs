//! Notification delivery seam.
//!
//! The invitation manager hands a composed notice to a
//! [`NotificationSender`]; what transport carries it (SMTP, a queue, a
//! provider API) is the implementation's business. Delivery failures are
//! non-fatal to the operations that trigger them.

use crate::error::Result;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tracing::info;

/// An invitation notice ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvitationNotice {
    /// Recipient email address.
    pub email: String,
    /// Name of the inviting organization.
    pub organization_name: String,
    /// Display name of the user who sent the invitation.
    pub inviter_name: String,
    /// Full activation link containing the token.
    pub activation_link: String,
    /// When the invitation expires (Unix seconds).
    pub expires_at: u64,
}

/// Delivers invitation notices.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// Deliver a notice. Errors are reported to the caller but never abort
    /// the operation that produced the notice.
    async fn send_invitation(&self, notice: &InvitationNotice) -> Result<()>;
}

/// Logs notices instead of delivering them. Development default.
#[derive(Debug, Default, Clone)]
pub struct ConsoleNotifier;

#[async_trait]
impl NotificationSender for ConsoleNotifier {
    async fn send_invitation(&self, notice: &InvitationNotice) -> Result<()> {
        info!(
            email = %notice.email,
            organization = %notice.organization_name,
            link = %notice.activation_link,
            "invitation notice (console delivery)"
        );
        Ok(())
    }
}

/// Records notices in memory for test assertions.
#[derive(Debug, Default, Clone)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<InvitationNotice>>>,
}

impl RecordingNotifier {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Notices delivered so far.
    #[must_use]
    pub fn sent(&self) -> Vec<InvitationNotice> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSender for RecordingNotifier {
    async fn send_invitation(&self, notice: &InvitationNotice) -> Result<()> {
        self.sent.lock().unwrap().push(notice.clone());
        Ok(())
    }
}

/// Always fails delivery. For exercising the degraded-success path.
#[derive(Debug, Default, Clone)]
pub struct FailingNotifier;

#[async_trait]
impl NotificationSender for FailingNotifier {
    async fn send_invitation(&self, _notice: &InvitationNotice) -> Result<()> {
        Err(crate::error::CoreError::external(
            "mail",
            "delivery refused",
        ))
    }
}
