use seatkeeper::billing::sign_payload;
use seatkeeper::{
    default_catalog, BillingConfig, CoreError, Identity, InMemoryTenantStore, InvitationConfig,
    InvitationManager, MockPaymentGateway, OrganizationRecord, OrganizationStore, PaymentStatus,
    PaymentStore, PlainCredentialIssuer, RecordingNotifier, Role, SubscriptionManager, UserRecord,
    UserStore, WebhookIngress, WebhookLedger, WebhookOutcome,
};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

const SECRET: &str = "whsec_integration_secret";

fn now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
}

struct Fixture {
    store: Arc<InMemoryTenantStore>,
    gateway: Arc<MockPaymentGateway>,
    invitations: InvitationManager<InMemoryTenantStore, RecordingNotifier, PlainCredentialIssuer>,
    ingress: WebhookIngress<InMemoryTenantStore, MockPaymentGateway>,
    owner: Identity,
}

impl Fixture {
    fn billing(&self) -> SubscriptionManager<InMemoryTenantStore, MockPaymentGateway> {
        SubscriptionManager::new(
            Arc::clone(&self.store),
            Arc::clone(&self.gateway),
            BillingConfig::default(),
        )
    }

    async fn deliver(&self, event_id: &str, event_type: &str, object: serde_json::Value) -> seatkeeper::Result<WebhookOutcome> {
        let payload = serde_json::json!({
            "id": event_id,
            "type": event_type,
            "data": { "object": object },
            "created": now(),
        })
        .to_string();
        let signature = sign_payload(SECRET, payload.as_bytes(), now() as i64);
        self.ingress.process_delivery(payload.as_bytes(), &signature).await
    }

    async fn upgrade_to(&self, price_id: &str, subscription_id: &str) -> String {
        let intent = self
            .billing()
            .start_checkout(&self.owner, price_id)
            .await
            .unwrap();
        let outcome = self
            .deliver(
                &format!("evt_checkout_{subscription_id}"),
                "checkout.session.completed",
                serde_json::json!({
                    "client_reference_id": intent.payment_id,
                    "subscription": subscription_id,
                    "customer": "cus_1",
                }),
            )
            .await
            .unwrap();
        assert_eq!(outcome, WebhookOutcome::Processed);
        intent.payment_id
    }
}

async fn setup() -> Fixture {
    let store = Arc::new(InMemoryTenantStore::new());
    store.seed_plans(default_catalog());
    let gateway = Arc::new(MockPaymentGateway::new());

    store
        .create_org(&OrganizationRecord {
            id: "org_1".to_string(),
            name: "Org One".to_string(),
            slug: "org-one".to_string(),
            super_admin_id: "owner_1".to_string(),
            current_payment_id: None,
            created_at: now(),
        })
        .await
        .unwrap();
    store
        .create_user(&UserRecord {
            id: "owner_1".to_string(),
            full_name: "Owner".to_string(),
            email: "owner@org-one.example".to_string(),
            password_hash: "hash".to_string(),
            role: Role::SuperAdmin,
            is_active: true,
            is_invited: false,
            is_public_admin: true,
            organization_id: Some("org_1".to_string()),
            created_at: now(),
        })
        .await
        .unwrap();

    let owner = Identity {
        user_id: "owner_1".to_string(),
        organization_id: "org_1".to_string(),
        role: Role::SuperAdmin,
        is_public_admin: true,
    };

    let invitations = InvitationManager::new(
        Arc::clone(&store),
        Arc::new(RecordingNotifier::new()),
        Arc::new(PlainCredentialIssuer),
        InvitationConfig::default(),
    );
    let manager = SubscriptionManager::new(
        Arc::clone(&store),
        Arc::clone(&gateway),
        BillingConfig::default(),
    );
    let ingress = WebhookIngress::new(Arc::clone(&store), manager, SECRET);

    Fixture {
        store,
        gateway,
        invitations,
        ingress,
        owner,
    }
}

async fn fill_members(fixture: &Fixture, count: usize) {
    for i in 0..count {
        let outcome = fixture
            .invitations
            .create_invitation(&fixture.owner, &format!("member{i}@example.com"), Role::Member)
            .await
            .unwrap();
        fixture
            .invitations
            .accept_invitation(&outcome.invitation.token, &format!("Member {i}"), "long-password")
            .await
            .unwrap();
    }
}

// An organization hits the free limit, upgrades through checkout, and the
// webhook-confirmed subscription raises the limit immediately.
#[tokio::test]
async fn test_upgrade_raises_seat_limit() {
    let fixture = setup().await;
    fill_members(&fixture, 3).await;

    let err = fixture
        .invitations
        .create_invitation(&fixture.owner, "fifth@example.com", Role::Member)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Capacity { .. }));

    fixture.upgrade_to("price_pro_monthly", "sub_pro").await;

    // Eleven seats now; the fifth member fits
    fixture
        .invitations
        .create_invitation(&fixture.owner, "fifth@example.com", Role::Member)
        .await
        .unwrap();
}

// Replaying the confirmation event mutates nothing the second time.
#[tokio::test]
async fn test_replayed_confirmation_is_inert() {
    let fixture = setup().await;
    let intent = fixture
        .billing()
        .start_checkout(&fixture.owner, "price_pro_monthly")
        .await
        .unwrap();
    let object = serde_json::json!({
        "client_reference_id": intent.payment_id,
        "subscription": "sub_pro",
        "customer": "cus_1",
    });

    let outcome = fixture
        .deliver("evt_1", "checkout.session.completed", object.clone())
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::Processed);
    let before = fixture.store.find_payment(&intent.payment_id).await.unwrap().unwrap();

    let outcome = fixture
        .deliver("evt_1", "checkout.session.completed", object)
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::AlreadyProcessed);

    let after = fixture.store.find_payment(&intent.payment_id).await.unwrap().unwrap();
    assert_eq!(before.updated_at, after.updated_at);
    assert_eq!(before, after);
}

// Switching plans twice keeps exactly one active row and cancels the old
// processor subscriptions.
#[tokio::test]
async fn test_plan_switches_hold_single_active_invariant() {
    let fixture = setup().await;

    let pro_payment = fixture.upgrade_to("price_pro_monthly", "sub_pro").await;
    assert_eq!(fixture.store.active_payment_count("org_1"), 1);

    let team_payment = fixture.upgrade_to("price_team_monthly", "sub_team").await;
    assert_eq!(fixture.store.active_payment_count("org_1"), 1);
    assert_ne!(pro_payment, team_payment);

    let old = fixture.store.find_payment(&pro_payment).await.unwrap().unwrap();
    assert_eq!(old.status, PaymentStatus::Cancelled);
    assert_eq!(fixture.gateway.cancelled(), vec!["sub_pro".to_string()]);
}

// A failed renewal drops the organization to free-tier limits; the retry
// that succeeds restores the paid limit.
#[tokio::test]
async fn test_past_due_drops_to_free_limits_until_recovery() {
    let fixture = setup().await;
    fixture.upgrade_to("price_pro_monthly", "sub_pro").await;
    fill_members(&fixture, 5).await;

    let outcome = fixture
        .deliver(
            "evt_fail",
            "invoice.payment_failed",
            serde_json::json!({"subscription": "sub_pro"}),
        )
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::Processed);

    // Six members on free-tier limits: no more invitations
    let err = fixture
        .invitations
        .create_invitation(&fixture.owner, "overflow@example.com", Role::Member)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Capacity { .. }));

    let outcome = fixture
        .deliver(
            "evt_recover",
            "invoice.paid",
            serde_json::json!({"subscription": "sub_pro", "period_end": now() + 30 * 86_400}),
        )
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::Processed);

    fixture
        .invitations
        .create_invitation(&fixture.owner, "overflow@example.com", Role::Member)
        .await
        .unwrap();
}

// When the paid period lapses, the sweep lands the organization on an
// active free row and free limits govern again.
#[tokio::test]
async fn test_expiry_sweep_restores_free_limits() {
    let fixture = setup().await;
    let payment_id = fixture.upgrade_to("price_pro_monthly", "sub_pro").await;
    fill_members(&fixture, 5).await;

    let mut payment = fixture.store.find_payment(&payment_id).await.unwrap().unwrap();
    payment.current_period_end = now() - 1;
    fixture.store.update_payment(&payment).await.unwrap();

    let swept = fixture.billing().sweep_expired().await.unwrap();
    assert_eq!(swept, 1);

    let active = fixture.store.find_active_payment("org_1").await.unwrap().unwrap();
    assert_eq!(active.plan_name, "Free");

    // Six members against four free seats: denied
    let err = fixture
        .invitations
        .create_invitation(&fixture.owner, "overflow@example.com", Role::Member)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Capacity { .. }));
}

// A processor-side cancellation clears the subscription and the pointer.
#[tokio::test]
async fn test_external_cancellation_clears_subscription() {
    let fixture = setup().await;
    fixture.upgrade_to("price_pro_monthly", "sub_pro").await;

    let outcome = fixture
        .deliver(
            "evt_deleted",
            "customer.subscription.deleted",
            serde_json::json!({"id": "sub_pro"}),
        )
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::Processed);

    assert!(fixture.store.find_active_payment("org_1").await.unwrap().is_none());
    let org = fixture.store.find_org("org_1").await.unwrap().unwrap();
    assert!(org.current_payment_id.is_none());

    let view = fixture.billing().current_subscription("org_1").await.unwrap();
    assert_eq!(view.plan_name, "Free");
}

// A delivery with a bad signature is rejected before the ledger sees it.
#[tokio::test]
async fn test_unsigned_delivery_never_reaches_ledger() {
    let fixture = setup().await;

    let payload = serde_json::json!({
        "id": "evt_forged",
        "type": "customer.subscription.deleted",
        "data": { "object": { "id": "sub_pro" } },
        "created": now(),
    })
    .to_string();
    let forged = sign_payload("wrong_secret", payload.as_bytes(), now() as i64);

    let err = fixture
        .ingress
        .process_delivery(payload.as_bytes(), &forged)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));
    assert!(fixture.store.find_event("evt_forged").await.unwrap().is_none());
}

// Downgrading to free is refused while members exceed the free limit, and
// allowed after trimming the roster.
#[tokio::test]
async fn test_downgrade_requires_fitting_roster() {
    let fixture = setup().await;
    fixture.upgrade_to("price_pro_monthly", "sub_pro").await;
    fill_members(&fixture, 5).await;

    let err = fixture.billing().downgrade_to_free(&fixture.owner).await.unwrap_err();
    assert!(matches!(err, CoreError::Capacity { .. }));

    // Trim to four members total
    let members = fixture.invitations.organization_members(&fixture.owner).await.unwrap();
    let mut removed = 0;
    for member in members {
        if member.role == Role::Member && removed < 2 {
            fixture
                .invitations
                .remove_member(&fixture.owner, &member.id)
                .await
                .unwrap();
            removed += 1;
        }
    }

    let free = fixture.billing().downgrade_to_free(&fixture.owner).await.unwrap();
    assert_eq!(free.status, PaymentStatus::Active);
    assert_eq!(fixture.gateway.cancelled(), vec!["sub_pro".to_string()]);
}
