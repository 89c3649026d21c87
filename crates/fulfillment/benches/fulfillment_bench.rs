use std::sync::Arc;

use chrono::Utc;
use common::{CupType, Currency, OrderId};
use criterion::{Criterion, criterion_group, criterion_main};
use fulfillment::{
    Bucket, EngineSettings, InMemoryEmailService, InMemoryObjectStorage, NotificationDispatcher,
    PaymentSucceeded, ReconciliationEngine, WebhookVerifier, compose_pdf, signature_header,
};
use order_store::{InMemoryOrderStore, Order, OrderStore};

fn artwork(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    });
    let mut out = std::io::Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

fn bench_compose_pdf(c: &mut Criterion) {
    let png = artwork(1024, 512);

    c.bench_function("artifact/compose_pdf_1024x512", |b| {
        b.iter(|| compose_pdf(&png, CupType::Hotzy).unwrap());
    });
}

fn bench_webhook_verify(c: &mut Criterion) {
    let secret = b"whsec_bench";
    let verifier = WebhookVerifier::new(secret.to_vec(), chrono::Duration::seconds(300));
    let body = serde_json::to_vec(&serde_json::json!({
        "type": "payment_intent.succeeded",
        "data": { "object": { "id": "pi_1", "amount_received": 2499, "currency": "cad" }}
    }))
    .unwrap();
    let now = Utc::now();
    let header = signature_header(secret, now.timestamp(), &body);

    c.bench_function("ingestion/verify_and_parse", |b| {
        b.iter(|| verifier.ingest(&body, &header, now).unwrap());
    });
}

fn bench_full_fulfillment(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let png = artwork(256, 128);

    c.bench_function("engine/payment_to_notification", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryOrderStore::new();
                let storage = InMemoryObjectStorage::new();
                let dispatcher = NotificationDispatcher::new(
                    Arc::new(storage.clone()),
                    Arc::new(InMemoryEmailService::new()),
                    "print@example.com",
                    fulfillment::DEFAULT_LINK_TTL,
                );
                let engine = ReconciliationEngine::new(
                    store.clone(),
                    Arc::new(storage.clone()),
                    dispatcher,
                    EngineSettings::default(),
                );

                let id = OrderId::new();
                let path = format!("{id}/wrap.png");
                store
                    .insert(Order::pending(id.clone(), CupType::Classic))
                    .await
                    .unwrap();
                storage.put(Bucket::Artwork, &path, png.clone(), "image/png");
                store.set_artwork_ref(&id, &path).await.unwrap();

                let event = PaymentSucceeded {
                    order_id: Some(id),
                    payment_intent_ref: Some("pi_bench".to_string()),
                    amount_minor: Some(2499),
                    currency: Some(Currency::parse("CAD").unwrap()),
                    ..Default::default()
                };
                engine.on_payment_succeeded(&event).await.unwrap();
            });
        });
    });
}

criterion_group!(
    benches,
    bench_compose_pdf,
    bench_webhook_verify,
    bench_full_fulfillment
);
criterion_main!(benches);
