//! Payment gateway webhook endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use bytes::Bytes;
use chrono::Utc;
use fulfillment::{FulfillmentError, PaymentEvent};
use order_store::OrderStore;
use serde::Serialize;

use crate::error::ApiError;
use crate::state::AppState;

/// Header carrying `t=<unix-seconds>,v1=<hex hmac>`.
pub const SIGNATURE_HEADER: &str = "payment-signature";

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
}

impl WebhookResponse {
    fn status(status: &'static str) -> Json<Self> {
        Json(Self {
            status,
            order_id: None,
        })
    }
}

/// POST /webhooks/payments — receive a signed payment event.
///
/// Acknowledges once the payment transition is durably recorded; fulfillment
/// continues on a background task. Unrecognized kinds and events that cannot
/// be matched to an order are acknowledged so the gateway stops redelivering.
#[tracing::instrument(skip_all)]
pub async fn receive<S: OrderStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, ApiError> {
    let Some(signature) = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
    else {
        metrics::counter!("webhook_events_total", "result" => "rejected").increment(1);
        return Err(ApiError::InvalidSignature(
            "missing signature header".to_string(),
        ));
    };

    let event = match state.verifier.ingest(&body, signature, Utc::now()) {
        Ok(event) => event,
        Err(FulfillmentError::Authenticity(reason)) => {
            metrics::counter!("webhook_events_total", "result" => "rejected").increment(1);
            tracing::warn!(%reason, "webhook rejected");
            return Err(ApiError::InvalidSignature(reason));
        }
        Err(e) => {
            metrics::counter!("webhook_events_total", "result" => "malformed").increment(1);
            return Err(e.into());
        }
    };

    let payment = match event {
        PaymentEvent::Ignored { kind } => {
            metrics::counter!("webhook_events_total", "result" => "ignored").increment(1);
            tracing::debug!(%kind, "ignoring payment event kind");
            return Ok(WebhookResponse::status("ignored"));
        }
        PaymentEvent::Succeeded(payment) => payment,
    };

    let recorded = match state.engine.record_payment(&payment).await {
        Ok(recorded) => recorded,
        Err(FulfillmentError::UnresolvedOrder(reason)) => {
            metrics::counter!("webhook_events_total", "result" => "unresolved").increment(1);
            tracing::warn!(
                %reason,
                event_id = payment.event_id.as_deref(),
                payment_intent = payment.payment_intent_ref.as_deref(),
                checkout_session = payment.checkout_session_ref.as_deref(),
                "payment event needs manual reconciliation"
            );
            return Ok(WebhookResponse::status("unresolved"));
        }
        Err(e) => {
            metrics::counter!("webhook_events_total", "result" => "failed").increment(1);
            return Err(e.into());
        }
    };
    metrics::counter!("webhook_events_total", "result" => "accepted").increment(1);

    let order_id = recorded.resolution.order_id;
    let engine = state.engine.clone();
    let task_order_id = order_id.clone();
    tokio::spawn(async move {
        match engine.reconcile(&task_order_id).await {
            Ok(outcome) => {
                tracing::info!(order_id = %task_order_id, outcome = outcome.as_str(), "reconciled after payment");
            }
            Err(e) => {
                tracing::error!(order_id = %task_order_id, error = %e, "reconciliation after payment failed");
            }
        }
    });

    Ok(Json(WebhookResponse {
        status: "accepted",
        order_id: Some(order_id.to_string()),
    }))
}
