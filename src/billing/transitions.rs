//! Subscription status transition rules.
//!
//! Every status write in this crate goes through [`can_transition`]; a write
//! outside the table is a bug surfaced as a conflict, never silently applied.

use crate::error::{CoreError, Result};
use crate::storage::PaymentStatus;

/// Whether `from` may move to `to`.
///
/// `Cancelled` and `Expired` are terminal. A pending row either activates
/// or is cancelled; it is never swept to expired.
#[must_use]
pub fn can_transition(from: PaymentStatus, to: PaymentStatus) -> bool {
    use PaymentStatus::{Active, Cancelled, Expired, PastDue, Pending};
    matches!(
        (from, to),
        (Pending, Active)
            | (Pending, Cancelled)
            | (Active, PastDue)
            | (Active, Cancelled)
            | (Active, Expired)
            | (PastDue, Active)
            | (PastDue, Cancelled)
            | (PastDue, Expired)
    )
}

/// Check a transition, returning a conflict if it is not in the table.
///
/// A same-state "transition" is allowed through so idempotent webhook
/// redeliveries and period refreshes need no special casing.
pub fn check_transition(from: PaymentStatus, to: PaymentStatus) -> Result<()> {
    if from == to || can_transition(from, to) {
        Ok(())
    } else {
        Err(CoreError::conflict(format!(
            "illegal subscription status transition {from} -> {to}"
        )))
    }
}
