//! Integration tests for the payment/artwork join.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::{CupType, Currency, OrderId};
use fulfillment::{
    Bucket, EmailService, EngineSettings, InMemoryEmailService, InMemoryObjectStorage,
    NotificationDispatcher, PaymentEvent, PaymentSucceeded, ReconcileOutcome,
    ReconciliationEngine, WebhookVerifier, signature_header,
};
use order_store::{FulfillmentState, InMemoryOrderStore, Order, OrderStore, OrderStoreExt};

const RECIPIENT: &str = "print@example.com";

/// Email double that checks, at send time, that the order already has an artifact.
#[derive(Clone)]
struct ArtifactCheckingEmail {
    store: InMemoryOrderStore,
    inner: InMemoryEmailService,
    premature: Arc<AtomicUsize>,
}

#[async_trait]
impl EmailService for ArtifactCheckingEmail {
    async fn send(&self, to: &str, subject: &str, body: &str) -> fulfillment::Result<()> {
        let id = subject
            .strip_prefix("New mug order ready to print: ")
            .and_then(OrderId::parse)
            .expect("subject names the order");
        let order = self.store.require(&id).await?;
        if order.artifact_ref.is_none() {
            self.premature.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.send(to, subject, body).await
    }
}

type TestEngine = ReconciliationEngine<InMemoryOrderStore>;

struct TestHarness {
    engine: Arc<TestEngine>,
    store: InMemoryOrderStore,
    storage: InMemoryObjectStorage,
    email: InMemoryEmailService,
    premature: Arc<AtomicUsize>,
}

impl TestHarness {
    fn new() -> Self {
        let store = InMemoryOrderStore::new();
        let storage = InMemoryObjectStorage::new();
        let email = InMemoryEmailService::new();
        let premature = Arc::new(AtomicUsize::new(0));

        let checking = ArtifactCheckingEmail {
            store: store.clone(),
            inner: email.clone(),
            premature: premature.clone(),
        };
        let dispatcher = NotificationDispatcher::new(
            Arc::new(storage.clone()),
            Arc::new(checking),
            RECIPIENT,
            Duration::from_secs(7 * 24 * 60 * 60),
        );
        let engine = ReconciliationEngine::new(
            store.clone(),
            Arc::new(storage.clone()),
            dispatcher,
            EngineSettings::default(),
        );

        Self {
            engine: Arc::new(engine),
            store,
            storage,
            email,
            premature,
        }
    }

    async fn pending_order(&self, id: &str, cup_type: CupType) -> OrderId {
        let id = OrderId::parse(id).unwrap();
        self.store
            .insert(Order::pending(id.clone(), cup_type))
            .await
            .unwrap();
        id
    }

    /// What the upload collaborator does: store the object, then the reference.
    async fn store_artwork(&self, id: &OrderId) {
        let path = format!("{id}/wrap.png");
        self.storage.put(Bucket::Artwork, &path, png(), "image/png");
        self.store.set_artwork_ref(id, &path).await.unwrap();
    }

    async fn order(&self, id: &OrderId) -> Order {
        self.store.require(id).await.unwrap()
    }
}

fn png() -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(32, 16, image::Rgba([0, 128, 255, 200]));
    let mut out = std::io::Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

fn payment_event(payment_intent: &str) -> PaymentSucceeded {
    PaymentSucceeded {
        event_id: Some("evt_1".to_string()),
        payment_intent_ref: Some(payment_intent.to_string()),
        amount_minor: Some(2499),
        currency: Some(Currency::parse("CAD").unwrap()),
        ..Default::default()
    }
}

fn payment_for(id: &OrderId) -> PaymentSucceeded {
    PaymentSucceeded {
        order_id: Some(id.clone()),
        ..payment_event("pi_1")
    }
}

/// The fields that make up an order's observable final state.
fn final_state(order: &Order) -> (FulfillmentState, Option<String>, bool, Option<i64>, Option<String>) {
    (
        order.state(),
        order.artifact_ref.clone(),
        order.notification_sent,
        order.amount_minor,
        order.currency.as_ref().map(|c| c.code().to_string()),
    )
}

#[tokio::test]
async fn test_payment_then_artwork_scenario() {
    let h = TestHarness::new();
    let id = h.pending_order("o1", CupType::Hotzy).await;

    h.engine.on_payment_succeeded(&payment_for(&id)).await.unwrap();
    assert_eq!(h.order(&id).await.state(), FulfillmentState::AwaitingArtwork);

    h.store_artwork(&id).await;
    h.engine.on_artwork_uploaded(&id).await.unwrap();

    let order = h.order(&id).await;
    assert_eq!(order.state(), FulfillmentState::AlreadyFulfilled);
    assert_eq!(order.artifact_ref.as_deref(), Some("o1/print.pdf"));
    assert!(order.notification_sent);
    assert_eq!(h.email.count_mentioning("o1"), 1);
}

#[tokio::test]
async fn test_arrival_order_does_not_change_final_state() {
    let forward = TestHarness::new();
    let a = forward.pending_order("o1", CupType::Hotzy).await;
    forward.engine.on_payment_succeeded(&payment_for(&a)).await.unwrap();
    forward.store_artwork(&a).await;
    forward.engine.on_artwork_uploaded(&a).await.unwrap();

    let reverse = TestHarness::new();
    let b = reverse.pending_order("o1", CupType::Hotzy).await;
    reverse.store_artwork(&b).await;
    assert_eq!(
        reverse.engine.on_artwork_uploaded(&b).await.unwrap(),
        ReconcileOutcome::AwaitingPayment
    );
    assert_eq!(reverse.order(&b).await.state(), FulfillmentState::AwaitingPayment);
    reverse.engine.on_payment_succeeded(&payment_for(&b)).await.unwrap();

    assert_eq!(
        final_state(&forward.order(&a).await),
        final_state(&reverse.order(&b).await)
    );
    assert_eq!(forward.email.sent_count(), 1);
    assert_eq!(reverse.email.sent_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_signals_fulfill_exactly_once() {
    for round in 0..10 {
        let h = TestHarness::new();
        let id = h.pending_order(&format!("race-{round}"), CupType::Classic).await;
        h.store_artwork(&id).await;
        // Widen the window between claim and completion.
        h.storage.set_download_delay(Some(Duration::from_millis(5)));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let engine = h.engine.clone();
            let event = payment_for(&id);
            handles.push(tokio::spawn(async move {
                engine.on_payment_succeeded(&event).await.map(|(_, outcome)| outcome)
            }));
        }
        for _ in 0..6 {
            let engine = h.engine.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move { engine.on_artwork_uploaded(&id).await }));
        }

        let outcomes: Vec<ReconcileOutcome> = futures_util::future::join_all(handles)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();

        let fulfilled = outcomes
            .iter()
            .filter(|o| matches!(o, ReconcileOutcome::Fulfilled { .. }))
            .count();
        assert_eq!(fulfilled, 1, "round {round}: {outcomes:?}");
        assert_eq!(h.storage.upload_count(Bucket::Artifacts), 1, "round {round}");
        assert_eq!(h.email.sent_count(), 1, "round {round}");
        assert_eq!(h.premature.load(Ordering::SeqCst), 0);

        let order = h.order(&id).await;
        assert_eq!(order.state(), FulfillmentState::AlreadyFulfilled);
        assert!(order.notification_sent);
        assert!(order.artifact_claim.is_none());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_duplicate_deliveries_after_fulfillment_write_nothing() {
    let h = TestHarness::new();
    let id = h.pending_order("o1", CupType::Hotzy).await;
    h.store_artwork(&id).await;
    h.engine.on_payment_succeeded(&payment_for(&id)).await.unwrap();
    let before = h.order(&id).await;

    let mut redelivered = payment_for(&id);
    redelivered.amount_minor = Some(99_999);
    redelivered.currency = Some(Currency::parse("USD").unwrap());

    let first = {
        let engine = h.engine.clone();
        let event = redelivered.clone();
        tokio::spawn(async move { engine.on_payment_succeeded(&event).await })
    };
    let second = {
        let engine = h.engine.clone();
        let event = redelivered.clone();
        tokio::spawn(async move { engine.on_payment_succeeded(&event).await })
    };

    for joined in [first.await.unwrap(), second.await.unwrap()] {
        let (recorded, outcome) = joined.unwrap();
        assert!(!recorded.newly_paid);
        assert_eq!(outcome, ReconcileOutcome::AlreadyFulfilled);
    }

    let after = h.order(&id).await;
    assert_eq!(after.artifact_ref, before.artifact_ref);
    assert_eq!(after.notification_sent_at, before.notification_sent_at);
    assert_eq!(after.amount_minor, Some(2499));
    assert_eq!(after.currency, before.currency);
    assert_eq!(h.email.sent_count(), 1);
    assert_eq!(h.storage.upload_count(Bucket::Artifacts), 1);
}

#[tokio::test]
async fn test_resolution_is_deterministic() {
    let h = TestHarness::new();

    // No pre-created order: the first delivery creates one.
    let (first, _) = h.engine.on_payment_succeeded(&payment_event("pi_42")).await.unwrap();
    assert!(first.resolution.created);
    let (second, _) = h.engine.on_payment_succeeded(&payment_event("pi_42")).await.unwrap();
    assert_eq!(first.resolution.order_id, second.resolution.order_id);

    // Same reference with an explicit id in metadata still lands on that order.
    let mut with_id = payment_event("pi_42");
    with_id.order_id = Some(first.resolution.order_id.clone());
    let (third, _) = h.engine.on_payment_succeeded(&with_id).await.unwrap();
    assert_eq!(third.resolution.order_id, first.resolution.order_id);
    assert_eq!(h.store.order_count().await, 1);
}

#[tokio::test]
async fn test_failed_dispatch_is_recoverable_by_operator() {
    let h = TestHarness::new();
    let id = h.pending_order("o1", CupType::Jumbo).await;
    h.store_artwork(&id).await;
    h.email.set_fail_on_send(true);

    let (_, outcome) = h.engine.on_payment_succeeded(&payment_for(&id)).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Fulfilled { notified: false });
    assert!(h.order(&id).await.needs_notification());

    // Automatic paths do not re-send once the artifact exists.
    assert_eq!(
        h.engine.on_artwork_uploaded(&id).await.unwrap(),
        ReconcileOutcome::AlreadyFulfilled
    );

    h.email.set_fail_on_send(false);
    h.engine.resend_notification(&id).await.unwrap();
    assert!(!h.order(&id).await.needs_notification());
    assert_eq!(h.email.sent_count(), 1);
    assert_eq!(h.storage.upload_count(Bucket::Artifacts), 1);
}

#[tokio::test]
async fn test_failed_generation_is_retried_by_next_signal() {
    let h = TestHarness::new();
    let id = h.pending_order("o1", CupType::Classic).await;
    h.store_artwork(&id).await;
    h.storage.set_fail_on_upload(true);

    assert!(h.engine.on_payment_succeeded(&payment_for(&id)).await.is_err());
    let order = h.order(&id).await;
    assert_eq!(order.state(), FulfillmentState::ReadyToFulfill);
    assert_eq!(h.email.sent_count(), 0);

    // Redelivery of the same webhook retries fulfillment.
    h.storage.set_fail_on_upload(false);
    let (recorded, outcome) = h.engine.on_payment_succeeded(&payment_for(&id)).await.unwrap();
    assert!(!recorded.newly_paid);
    assert_eq!(outcome, ReconcileOutcome::Fulfilled { notified: true });
}

#[tokio::test]
async fn test_signed_webhook_end_to_end() {
    let h = TestHarness::new();
    let id = h.pending_order("o1", CupType::Hotzy).await;
    h.store_artwork(&id).await;

    let secret = b"whsec_integration";
    let verifier = WebhookVerifier::new(secret.to_vec(), chrono::Duration::seconds(300));
    let body = serde_json::to_vec(&serde_json::json!({
        "id": "evt_9",
        "type": "checkout.session.completed",
        "data": { "object": {
            "id": "cs_9",
            "payment_intent": "pi_9",
            "amount_total": 2499,
            "currency": "cad",
            "payment_status": "paid",
            "metadata": { "order_id": "o1" },
        }}
    }))
    .unwrap();
    let now = Utc::now();
    let header = signature_header(secret, now.timestamp(), &body);

    let PaymentEvent::Succeeded(event) = verifier.ingest(&body, &header, now).unwrap() else {
        panic!("expected a payment event");
    };
    let (recorded, outcome) = h.engine.on_payment_succeeded(&event).await.unwrap();
    assert_eq!(recorded.resolution.order_id, id);
    assert_eq!(outcome, ReconcileOutcome::Fulfilled { notified: true });

    let order = h.order(&id).await;
    assert_eq!(order.checkout_session_ref.as_deref(), Some("cs_9"));
    assert_eq!(order.payment_intent_ref.as_deref(), Some("pi_9"));
    assert_eq!(order.amount_minor, Some(2499));
}
