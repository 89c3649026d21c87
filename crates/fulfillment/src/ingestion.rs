//! Payment event ingestion: webhook authentication and normalization.
//!
//! Deliveries carry a `t=<unix-seconds>,v1=<hex>` signature header. The
//! signed payload is `"{t}.{raw body}"` under HMAC-SHA256 with the shared
//! webhook secret. Only after the signature checks out is the body parsed.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use common::{CupType, Currency, OrderId};
use serde::Deserialize;

use crate::error::{FulfillmentError, Result};
use crate::signing::{sign_hex, verify_hex};

/// Default replay window for signed deliveries.
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

const CHECKOUT_SESSION_COMPLETED: &str = "checkout.session.completed";
const PAYMENT_INTENT_SUCCEEDED: &str = "payment_intent.succeeded";

/// A normalized payment confirmation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PaymentSucceeded {
    /// The gateway's id for this delivery, for log correlation only.
    pub event_id: Option<String>,
    pub payment_intent_ref: Option<String>,
    pub checkout_session_ref: Option<String>,
    pub amount_minor: Option<i64>,
    pub currency: Option<Currency>,
    /// Authoritative order id from event metadata, when the storefront set one.
    pub order_id: Option<OrderId>,
    /// Cup type from event metadata; only used when creating an order.
    pub cup_type: Option<CupType>,
}

impl PaymentSucceeded {
    /// Returns true if the event carries anything an order can be matched on.
    pub fn has_correlation(&self) -> bool {
        self.order_id.is_some()
            || self.payment_intent_ref.is_some()
            || self.checkout_session_ref.is_some()
    }
}

/// The result of normalizing an authenticated delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentEvent {
    Succeeded(PaymentSucceeded),
    /// A kind this pipeline does not act on. Acknowledged, never retried.
    Ignored { kind: String },
}

impl PaymentEvent {
    pub fn kind_label(&self) -> &str {
        match self {
            PaymentEvent::Succeeded(_) => "payment_succeeded",
            PaymentEvent::Ignored { .. } => "ignored",
        }
    }
}

/// Verifies webhook signatures and normalizes event bodies.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: Vec<u8>,
    tolerance: Duration,
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<Vec<u8>>, tolerance: Duration) -> Self {
        Self {
            secret: secret.into(),
            tolerance,
        }
    }

    /// Checks the signature header against the raw body.
    pub fn verify(&self, payload: &[u8], header: &str, now: DateTime<Utc>) -> Result<()> {
        let parsed = SignatureHeader::parse(header)?;

        let age = now.timestamp().abs_diff(parsed.timestamp);
        if age > self.tolerance.num_seconds().unsigned_abs() {
            return Err(FulfillmentError::Authenticity(
                "signature timestamp outside tolerance".to_string(),
            ));
        }

        let signed = signed_payload(parsed.raw_timestamp, payload);
        if parsed
            .signatures
            .iter()
            .any(|candidate| verify_hex(&self.secret, &signed, candidate))
        {
            Ok(())
        } else {
            Err(FulfillmentError::Authenticity(
                "no matching signature".to_string(),
            ))
        }
    }

    /// Authenticates a delivery and normalizes it.
    ///
    /// Nothing is parsed until the signature is verified.
    #[tracing::instrument(skip(self, payload, header), fields(size = payload.len()))]
    pub fn ingest(&self, payload: &[u8], header: &str, now: DateTime<Utc>) -> Result<PaymentEvent> {
        self.verify(payload, header, now)?;
        parse_event(payload)
    }
}

/// Builds a signature header for `payload`, as the gateway would.
pub fn signature_header(secret: &[u8], timestamp: i64, payload: &[u8]) -> String {
    let raw_timestamp = timestamp.to_string();
    let signature = sign_hex(secret, &signed_payload(&raw_timestamp, payload));
    format!("t={raw_timestamp},v1={signature}")
}

fn signed_payload(raw_timestamp: &str, payload: &[u8]) -> Vec<u8> {
    let mut signed = Vec::with_capacity(raw_timestamp.len() + 1 + payload.len());
    signed.extend_from_slice(raw_timestamp.as_bytes());
    signed.push(b'.');
    signed.extend_from_slice(payload);
    signed
}

struct SignatureHeader<'a> {
    raw_timestamp: &'a str,
    timestamp: i64,
    signatures: Vec<&'a str>,
}

impl<'a> SignatureHeader<'a> {
    fn parse(header: &'a str) -> Result<Self> {
        let mut raw_timestamp = None;
        let mut signatures = Vec::new();

        for part in header.split(',') {
            let Some((key, value)) = part.trim().split_once('=') else {
                continue;
            };
            match key {
                "t" => raw_timestamp = Some(value),
                "v1" => signatures.push(value),
                _ => {}
            }
        }

        let raw_timestamp = raw_timestamp.ok_or_else(|| {
            FulfillmentError::Authenticity("signature header has no timestamp".to_string())
        })?;
        let timestamp = raw_timestamp.parse::<i64>().map_err(|_| {
            FulfillmentError::Authenticity("signature timestamp is not a number".to_string())
        })?;
        if signatures.is_empty() {
            return Err(FulfillmentError::Authenticity(
                "signature header has no v1 signature".to_string(),
            ));
        }

        Ok(Self {
            raw_timestamp,
            timestamp,
            signatures,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    id: Option<String>,
    #[serde(rename = "type")]
    kind: String,
    data: RawEventData,
}

#[derive(Debug, Deserialize)]
struct RawEventData {
    object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct CheckoutSessionObject {
    id: String,
    payment_intent: Option<String>,
    amount_total: Option<i64>,
    currency: Option<String>,
    payment_status: Option<String>,
    metadata: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct PaymentIntentObject {
    id: String,
    amount_received: Option<i64>,
    amount: Option<i64>,
    currency: Option<String>,
    metadata: Option<HashMap<String, String>>,
}

/// Normalizes an already-authenticated event body.
pub fn parse_event(payload: &[u8]) -> Result<PaymentEvent> {
    let raw: RawEvent =
        serde_json::from_slice(payload).map_err(|e| FulfillmentError::Malformed(e.to_string()))?;

    match raw.kind.as_str() {
        CHECKOUT_SESSION_COMPLETED => {
            let session: CheckoutSessionObject = serde_json::from_value(raw.data.object)
                .map_err(|e| FulfillmentError::Malformed(e.to_string()))?;

            // Delayed payment methods complete the session before the money moves.
            if session.payment_status.as_deref().is_some_and(|s| s != "paid") {
                return Ok(PaymentEvent::Ignored { kind: raw.kind });
            }

            let metadata = session.metadata.unwrap_or_default();
            Ok(PaymentEvent::Succeeded(PaymentSucceeded {
                event_id: raw.id,
                payment_intent_ref: non_empty(session.payment_intent),
                checkout_session_ref: non_empty(Some(session.id)),
                amount_minor: session.amount_total,
                currency: parse_currency(session.currency)?,
                order_id: parse_order_id(&metadata)?,
                cup_type: parse_cup_type(&metadata),
            }))
        }
        PAYMENT_INTENT_SUCCEEDED => {
            let intent: PaymentIntentObject = serde_json::from_value(raw.data.object)
                .map_err(|e| FulfillmentError::Malformed(e.to_string()))?;

            let metadata = intent.metadata.unwrap_or_default();
            Ok(PaymentEvent::Succeeded(PaymentSucceeded {
                event_id: raw.id,
                payment_intent_ref: non_empty(Some(intent.id)),
                checkout_session_ref: None,
                amount_minor: intent.amount_received.or(intent.amount),
                currency: parse_currency(intent.currency)?,
                order_id: parse_order_id(&metadata)?,
                cup_type: parse_cup_type(&metadata),
            }))
        }
        _ => Ok(PaymentEvent::Ignored { kind: raw.kind }),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_currency(value: Option<String>) -> Result<Option<Currency>> {
    non_empty(value)
        .map(|code| Currency::parse(&code).map_err(|e| FulfillmentError::Malformed(e.to_string())))
        .transpose()
}

fn parse_order_id(metadata: &HashMap<String, String>) -> Result<Option<OrderId>> {
    match metadata.get("order_id").filter(|v| !v.trim().is_empty()) {
        None => Ok(None),
        Some(raw) => OrderId::parse(raw.trim()).map(Some).ok_or_else(|| {
            FulfillmentError::Malformed(format!("invalid order_id in metadata: {raw:?}"))
        }),
    }
}

fn parse_cup_type(metadata: &HashMap<String, String>) -> Option<CupType> {
    let raw = metadata.get("cup_type")?;
    match raw.parse::<CupType>() {
        Ok(cup) => Some(cup),
        Err(_) => {
            tracing::warn!(cup_type = %raw, "unknown cup type in event metadata; using default");
            None
        }
    }
}
