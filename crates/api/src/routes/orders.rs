//! Order placement, artwork upload and operator endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::BytesRejection;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use common::{CupType, Currency, OrderId};
use fulfillment::ReconcileOutcome;
use order_store::{FulfillmentState, Order, OrderStore};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;

/// Header carrying the per-order artwork upload token.
pub const UPLOAD_TOKEN_HEADER: &str = "x-upload-token";

// -- Request types --

#[derive(Debug, Default, Deserialize)]
pub struct CreateOrderRequest {
    pub order_id: Option<String>,
    pub cup_type: Option<String>,
    pub currency: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 500;

// -- Response types --

#[derive(Serialize)]
pub struct OrderCreatedResponse {
    pub order_id: String,
    pub cup_type: CupType,
    pub upload_token: String,
    pub upload_url: String,
}

#[derive(Serialize)]
pub struct OrderResponse {
    pub order_id: String,
    pub status: &'static str,
    pub state: FulfillmentState,
    pub cup_type: CupType,
    pub currency: Option<String>,
    pub amount_minor: Option<i64>,
    pub artwork_ref: Option<String>,
    pub artifact_ref: Option<String>,
    pub notification_sent: bool,
    pub notification_sent_at: Option<DateTime<Utc>>,
    pub needs_notification: bool,
    pub payment_intent_ref: Option<String>,
    pub checkout_session_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            status: order.status.as_str(),
            state: order.state(),
            needs_notification: order.needs_notification(),
            order_id: order.id.to_string(),
            cup_type: order.cup_type,
            currency: order.currency.map(|c| c.code().to_string()),
            amount_minor: order.amount_minor,
            artwork_ref: order.artwork_ref,
            artifact_ref: order.artifact_ref,
            notification_sent: order.notification_sent,
            notification_sent_at: order.notification_sent_at,
            payment_intent_ref: order.payment_intent_ref,
            checkout_session_ref: order.checkout_session_ref,
            created_at: order.created_at,
            paid_at: order.paid_at,
            updated_at: order.updated_at,
        }
    }
}

#[derive(Serialize)]
pub struct OrderListResponse {
    pub orders: Vec<OrderResponse>,
}

#[derive(Serialize)]
pub struct ArtworkAcceptedResponse {
    pub order_id: String,
    pub artwork_ref: String,
    pub size: usize,
}

#[derive(Serialize)]
pub struct ResendResponse {
    pub order_id: String,
    pub status: &'static str,
}

#[derive(Serialize)]
pub struct RegenerateResponse {
    pub order_id: String,
    #[serde(flatten)]
    pub result: ReconcileOutcome,
}

fn parse_order_id(raw: &str) -> Result<OrderId, ApiError> {
    OrderId::parse(raw)
        .ok_or_else(|| ApiError::NotFound("order_not_found", format!("Order not found: {raw}")))
}

// -- Handlers --

/// POST /orders — place an order and issue its artwork upload token.
///
/// Operator-authenticated; stands in for storefront order placement.
#[tracing::instrument(skip_all)]
pub async fn create<S: OrderStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<OrderCreatedResponse>), ApiError> {
    state.require_admin(&headers)?;

    let req: CreateOrderRequest = if body.is_empty() {
        CreateOrderRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid request body: {e}")))?
    };

    let order_id = req
        .order_id
        .as_deref()
        .map(|raw| {
            OrderId::parse(raw)
                .ok_or_else(|| ApiError::BadRequest(format!("Invalid order_id: {raw:?}")))
        })
        .transpose()?;
    let cup_type = req
        .cup_type
        .as_deref()
        .map(|raw| raw.parse::<CupType>())
        .transpose()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
        .unwrap_or_default();
    let currency = req
        .currency
        .as_deref()
        .map(Currency::parse)
        .transpose()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let placed = state
        .intake
        .place_order(order_id, cup_type, currency)
        .await?;
    let order_id = placed.order.id.to_string();

    Ok((
        StatusCode::CREATED,
        Json(OrderCreatedResponse {
            upload_url: format!("/orders/{order_id}/artwork"),
            order_id,
            cup_type: placed.order.cup_type,
            upload_token: placed.upload_token,
        }),
    ))
}

/// GET /orders/{id} — order snapshot with its inferred fulfillment state.
#[tracing::instrument(skip(state, headers))]
pub async fn get<S: OrderStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    state.require_admin(&headers)?;
    let order_id = parse_order_id(&id)?;

    let order = state
        .engine
        .store()
        .get(&order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("order_not_found", format!("Order not found: {order_id}")))?;

    Ok(Json(OrderResponse::from(order)))
}

/// GET /orders — paid orders with artwork still short of a sent notification.
#[tracing::instrument(skip(state, headers))]
pub async fn list_unfulfilled<S: OrderStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Json<OrderListResponse>, ApiError> {
    state.require_admin(&headers)?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .min(MAX_LIST_LIMIT);

    let orders = state.engine.store().list_unfulfilled(limit).await?;

    Ok(Json(OrderListResponse {
        orders: orders.into_iter().map(OrderResponse::from).collect(),
    }))
}

/// PUT /orders/{id}/artwork — accept customer artwork.
///
/// Responds once the artwork is stored and recorded; fulfillment continues
/// on a background task.
#[tracing::instrument(skip(state, headers, body), fields(size = tracing::field::Empty))]
pub async fn upload_artwork<S: OrderStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Result<Bytes, BytesRejection>,
) -> Result<(StatusCode, Json<ArtworkAcceptedResponse>), ApiError> {
    let order_id = parse_order_id(&id)?;
    let token = headers
        .get(UPLOAD_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized("invalid_upload_token"))?;
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());

    let body = match body {
        Ok(body) => body,
        Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            // The body was cut off at the limit; report its declared size if known.
            let limit = state.intake.max_bytes();
            let size = headers
                .get(header::CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<usize>().ok())
                .filter(|declared| *declared > limit)
                .unwrap_or_else(|| limit.saturating_add(1));
            // Token problems still take precedence over size.
            state.intake.validate(&order_id, token, content_type, size)?;
            return Err(ApiError::BadRequest(rejection.body_text()));
        }
        Err(rejection) => return Err(ApiError::BadRequest(rejection.body_text())),
    };
    tracing::Span::current().record("size", body.len());

    let stored = state
        .intake
        .accept(&order_id, token, content_type, body)
        .await?;

    let engine = state.engine.clone();
    let task_order_id = order_id.clone();
    tokio::spawn(async move {
        match engine.on_artwork_uploaded(&task_order_id).await {
            Ok(outcome) => {
                tracing::info!(order_id = %task_order_id, outcome = outcome.as_str(), "reconciled after artwork upload");
            }
            Err(e) => {
                tracing::error!(order_id = %task_order_id, error = %e, "reconciliation after artwork upload failed");
            }
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(ArtworkAcceptedResponse {
            order_id: stored.order_id.to_string(),
            artwork_ref: stored.artwork_ref,
            size: stored.size,
        }),
    ))
}

/// POST /orders/{id}/resend-notification — re-send with a fresh signed link.
#[tracing::instrument(skip(state, headers))]
pub async fn resend_notification<S: OrderStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<ResendResponse>, ApiError> {
    state.require_admin(&headers)?;
    let order_id = parse_order_id(&id)?;

    state.engine.resend_notification(&order_id).await?;
    tracing::info!(order_id = %order_id, "notification re-sent by operator");

    Ok(Json(ResendResponse {
        order_id: order_id.to_string(),
        status: "sent",
    }))
}

/// POST /orders/{id}/regenerate — rebuild the artifact and re-notify.
#[tracing::instrument(skip(state, headers))]
pub async fn regenerate<S: OrderStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<RegenerateResponse>, ApiError> {
    state.require_admin(&headers)?;
    let order_id = parse_order_id(&id)?;

    let result = state.engine.regenerate(&order_id).await?;

    Ok(Json(RegenerateResponse {
        order_id: order_id.to_string(),
        result,
    }))
}
