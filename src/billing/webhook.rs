//! Payment processor webhook ingress.
//!
//! Verification happens before parsing; the idempotency ledger is consulted
//! before any dispatch. A successfully processed event ID never mutates
//! payment state again; a delivery that failed mid-dispatch stays open on
//! the ledger so the processor's retry can run it again.

use super::gateway::PaymentGateway;
use super::manager::SubscriptionManager;
use crate::error::{CoreError, Result};
use crate::storage::{
    OrganizationStore, PaymentStore, PlanStore, UserStore, WebhookEventRecord, WebhookLedger,
};
use crate::util::current_timestamp;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{info, instrument, warn};

/// Maximum accepted age of a signature timestamp, in seconds.
const SIGNATURE_TOLERANCE: i64 = 300;

/// A verified webhook event.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct WebhookEvent {
    /// The processor's event ID.
    pub id: String,
    /// Event type (e.g. "checkout.session.completed").
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event payload.
    pub data: WebhookEventData,
    /// When the processor created the event.
    pub created: u64,
}

/// Webhook event payload.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct WebhookEventData {
    /// The object that triggered the event.
    pub object: serde_json::Value,
}

/// Outcome of webhook processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// The event mutated local state.
    Processed,
    /// The event is not relevant here, or referenced no known record.
    Ignored,
    /// The event ID was seen before; nothing was done.
    AlreadyProcessed,
}

/// Webhook ingress: signature verification, idempotency, dispatch.
///
/// The signing secret is held as a [`SecretString`] so it cannot leak
/// through debug output.
pub struct WebhookIngress<S, G> {
    store: Arc<S>,
    manager: SubscriptionManager<S, G>,
    signing_secret: SecretString,
}

impl<S, G> WebhookIngress<S, G>
where
    S: OrganizationStore + UserStore + PaymentStore + PlanStore + WebhookLedger,
    G: PaymentGateway,
{
    /// Create a new ingress.
    pub fn new(
        store: Arc<S>,
        manager: SubscriptionManager<S, G>,
        signing_secret: impl Into<String>,
    ) -> Self {
        Self {
            store,
            manager,
            signing_secret: SecretString::new(signing_secret.into()),
        }
    }

    /// Verify a delivery's signature and parse the event.
    ///
    /// The signature header carries `t=<unix>,v1=<hex hmac>`; the HMAC is
    /// computed over `"{t}.{body}"` with the signing secret. Comparison is
    /// constant time, and the timestamp must be within the tolerance window
    /// in either direction.
    pub fn verify_signature(&self, payload: &[u8], signature: &str) -> Result<WebhookEvent> {
        let parts = parse_signature_header(signature)?;

        let now = current_timestamp() as i64;
        if (now - parts.timestamp).abs() > SIGNATURE_TOLERANCE {
            return Err(CoreError::validation("webhook timestamp outside tolerance"));
        }

        let signed_payload = format!("{}.{}", parts.timestamp, String::from_utf8_lossy(payload));
        let expected = compute_signature(
            self.signing_secret.expose_secret(),
            signed_payload.as_bytes(),
        )?;

        let expected_bytes = hex::decode(&expected)
            .map_err(|_| CoreError::internal("signature hex encoding failed"))?;
        let provided_bytes = hex::decode(&parts.signature)
            .map_err(|_| CoreError::validation("malformed webhook signature"))?;

        if expected_bytes.ct_eq(&provided_bytes).unwrap_u8() != 1 {
            return Err(CoreError::validation("invalid webhook signature"));
        }

        serde_json::from_slice(payload).map_err(|e| {
            warn!(error = %e, "Failed to parse webhook payload");
            CoreError::validation("malformed webhook payload")
        })
    }

    /// Verify and process a raw delivery in one call.
    pub async fn process_delivery(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<WebhookOutcome> {
        let event = self.verify_signature(payload, signature)?;
        self.handle_event(event).await
    }

    /// Process a verified event through the idempotency ledger.
    ///
    /// The event is recorded before dispatch. A dispatch failure leaves the
    /// ledger entry unprocessed with the error noted and propagates, so a
    /// retried delivery dispatches again; events whose referenced records no
    /// longer exist are noted as processed and ignored rather than retried.
    #[instrument(skip(self, event), fields(event_id = %event.id, event_type = %event.event_type))]
    pub async fn handle_event(&self, event: WebhookEvent) -> Result<WebhookOutcome> {
        if let Some(existing) = self.store.find_event(&event.id).await? {
            if existing.processed {
                return Ok(WebhookOutcome::AlreadyProcessed);
            }
            // An earlier delivery failed mid-dispatch; run it again against
            // the existing ledger row
        } else {
            let record = WebhookEventRecord {
                external_event_id: event.id.clone(),
                event_type: event.event_type.clone(),
                processed: false,
                processing_error: None,
                received_at: current_timestamp(),
            };
            // The unique event ID decides races between concurrent deliveries
            if let Err(err) = self.store.record_event(&record).await {
                return match err {
                    CoreError::Conflict(_) => Ok(WebhookOutcome::AlreadyProcessed),
                    other => Err(other),
                };
            }
        }

        match self.dispatch(&event).await {
            Ok(outcome) => {
                self.store.mark_event(&event.id, true, None).await?;
                Ok(outcome)
            }
            Err(CoreError::NotFound(detail)) => {
                // The processor knows a record we do not. Note it for
                // operators; retrying cannot help.
                warn!(detail = %detail, "Webhook event references no known record");
                self.store
                    .mark_event(&event.id, true, Some(format!("no matching record: {detail}")))
                    .await?;
                Ok(WebhookOutcome::Ignored)
            }
            Err(err) => {
                self.store
                    .mark_event(&event.id, false, Some(err.to_string()))
                    .await?;
                Err(err)
            }
        }
    }

    async fn dispatch(&self, event: &WebhookEvent) -> Result<WebhookOutcome> {
        match event.event_type.as_str() {
            "checkout.session.completed" => self.on_checkout_completed(event).await,
            "invoice.paid" | "invoice.payment_succeeded" => self.on_invoice_paid(event).await,
            "invoice.payment_failed" => self.on_payment_failed(event).await,
            "customer.subscription.updated" => self.on_subscription_updated(event).await,
            "customer.subscription.deleted" => self.on_subscription_deleted(event).await,
            _ => Ok(WebhookOutcome::Ignored),
        }
    }

    async fn on_checkout_completed(&self, event: &WebhookEvent) -> Result<WebhookOutcome> {
        let object = &event.data.object;
        let Some(payment_id) = str_field(object, "client_reference_id") else {
            warn!("Checkout completion without a correlation handle");
            return Ok(WebhookOutcome::Ignored);
        };
        let Some(subscription_id) = str_field(object, "subscription") else {
            // Not a subscription checkout
            return Ok(WebhookOutcome::Ignored);
        };
        let customer_id = str_field(object, "customer").unwrap_or_default();

        self.manager
            .confirm_checkout(payment_id, subscription_id, customer_id)
            .await?;
        info!(payment_id, subscription_id, "Checkout completion processed");
        Ok(WebhookOutcome::Processed)
    }

    async fn on_invoice_paid(&self, event: &WebhookEvent) -> Result<WebhookOutcome> {
        let object = &event.data.object;
        let Some(subscription_id) = str_field(object, "subscription") else {
            return Ok(WebhookOutcome::Ignored);
        };
        let period_end = object.get("period_end").and_then(serde_json::Value::as_u64);

        self.manager.record_renewal(subscription_id, period_end).await?;
        Ok(WebhookOutcome::Processed)
    }

    async fn on_payment_failed(&self, event: &WebhookEvent) -> Result<WebhookOutcome> {
        let object = &event.data.object;
        let Some(subscription_id) = str_field(object, "subscription") else {
            return Ok(WebhookOutcome::Ignored);
        };

        self.manager.record_payment_failure(subscription_id).await?;
        Ok(WebhookOutcome::Processed)
    }

    async fn on_subscription_updated(&self, event: &WebhookEvent) -> Result<WebhookOutcome> {
        let object = &event.data.object;
        let Some(subscription_id) = str_field(object, "id") else {
            return Ok(WebhookOutcome::Ignored);
        };
        let period_end = object
            .get("current_period_end")
            .and_then(serde_json::Value::as_u64);
        let cancel_at_period_end = object
            .get("cancel_at_period_end")
            .and_then(serde_json::Value::as_bool);

        self.manager
            .record_subscription_update(subscription_id, period_end, cancel_at_period_end)
            .await?;
        Ok(WebhookOutcome::Processed)
    }

    async fn on_subscription_deleted(&self, event: &WebhookEvent) -> Result<WebhookOutcome> {
        let object = &event.data.object;
        let Some(subscription_id) = str_field(object, "id") else {
            return Err(CoreError::validation(
                "subscription deletion event missing subscription ID",
            ));
        };

        self.manager
            .record_external_cancellation(subscription_id)
            .await?;
        Ok(WebhookOutcome::Processed)
    }
}

fn str_field<'a>(object: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    object.get(key).and_then(serde_json::Value::as_str)
}

struct SignatureParts {
    timestamp: i64,
    signature: String,
}

fn parse_signature_header(header: &str) -> Result<SignatureParts> {
    let mut timestamp = None;
    let mut signature = None;

    for part in header.split(',') {
        let Some((key, value)) = part.split_once('=') else {
            return Err(CoreError::validation("malformed signature header"));
        };
        match key.trim() {
            "t" => timestamp = value.parse().ok(),
            "v1" => signature = Some(value.to_string()),
            _ => {}
        }
    }

    Ok(SignatureParts {
        timestamp: timestamp
            .ok_or_else(|| CoreError::validation("signature header missing timestamp"))?,
        signature: signature
            .ok_or_else(|| CoreError::validation("signature header missing v1 signature"))?,
    })
}

fn compute_signature(secret: &str, payload: &[u8]) -> Result<String> {
    type HmacSha256 = Hmac<Sha256>;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| CoreError::internal("HMAC key setup failed"))?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Build a valid signature header for a payload. Test helper.
#[must_use]
pub fn sign_payload(secret: &str, payload: &[u8], timestamp: i64) -> String {
    let signed_payload = format!("{}.{}", timestamp, String::from_utf8_lossy(payload));
    let sig = compute_signature(secret, signed_payload.as_bytes()).unwrap_or_default();
    format!("t={timestamp},v1={sig}")
}
