//! Order placement and artwork intake.
//!
//! Uploads are authenticated with a per-order token and checked against a
//! size ceiling and a content-type allow-list before storage is touched.

use bytes::Bytes;
use chrono::Utc;
use common::{CupType, Currency, OrderId};
use order_store::{FulfillmentState, Order, OrderStore};

use crate::error::{FulfillmentError, Result};
use crate::services::{Bucket, SharedObjectStorage};
use crate::signing::UploadTokenSigner;

/// Default artwork size ceiling (15 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 15 * 1024 * 1024;

const ALLOWED_CONTENT_TYPES: [(&str, &str); 3] = [
    ("image/png", "png"),
    ("image/jpeg", "jpg"),
    ("image/webp", "webp"),
];

/// Maps an allowed artwork content type to its file extension.
///
/// Parameters such as `; charset=...` are ignored.
pub fn artwork_extension(content_type: &str) -> Option<&'static str> {
    let essence = content_type.split(';').next()?.trim().to_ascii_lowercase();
    ALLOWED_CONTENT_TYPES
        .iter()
        .find(|(allowed, _)| *allowed == essence)
        .map(|(_, ext)| *ext)
}

pub fn artwork_path(order_id: &OrderId, extension: &str) -> String {
    format!("{order_id}/wrap.{extension}")
}

/// A freshly placed order and the token its customer uploads artwork with.
#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub order: Order,
    pub upload_token: String,
}

/// Accepted artwork, ready to hand to the reconciliation engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtwork {
    pub order_id: OrderId,
    pub artwork_ref: String,
    pub size: usize,
}

pub struct ArtworkIntake<S: OrderStore> {
    store: S,
    storage: SharedObjectStorage,
    tokens: UploadTokenSigner,
    max_bytes: usize,
}

impl<S: OrderStore> ArtworkIntake<S> {
    pub fn new(
        store: S,
        storage: SharedObjectStorage,
        tokens: UploadTokenSigner,
        max_bytes: usize,
    ) -> Self {
        Self {
            store,
            storage,
            tokens,
            max_bytes,
        }
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Creates a pending order and issues its upload token.
    #[tracing::instrument(skip(self))]
    pub async fn place_order(
        &self,
        order_id: Option<OrderId>,
        cup_type: CupType,
        currency: Option<Currency>,
    ) -> Result<PlacedOrder> {
        let mut order = Order::pending(order_id.unwrap_or_default(), cup_type);
        if let Some(currency) = currency {
            order = order.with_currency(currency);
        }
        self.store.insert(order.clone()).await?;

        let upload_token = self.tokens.issue(&order.id, Utc::now());
        metrics::counter!("orders_placed_total").increment(1);
        tracing::info!(order_id = %order.id, "order placed");
        Ok(PlacedOrder {
            order,
            upload_token,
        })
    }

    /// Checks token, size and content type. Touches nothing.
    pub fn validate(
        &self,
        order_id: &OrderId,
        token: &str,
        content_type: Option<&str>,
        size: usize,
    ) -> Result<&'static str> {
        self.tokens.verify(order_id, token, Utc::now())?;

        if size > self.max_bytes {
            return Err(FulfillmentError::TooLarge {
                size,
                limit: self.max_bytes,
            });
        }
        if size == 0 {
            return Err(FulfillmentError::Malformed("artwork body is empty".to_string()));
        }

        let content_type = content_type.unwrap_or_default();
        artwork_extension(content_type)
            .ok_or_else(|| FulfillmentError::UnsupportedMediaType(content_type.to_string()))
    }

    /// Validates and stores artwork, then records the reference on the order.
    ///
    /// A re-upload before fulfillment overwrites the existing artwork object
    /// so the order's reference stays stable. If a generation claim was taken
    /// before the upload landed, the print file may be built from the previous
    /// artwork; that is reported as `ClaimHeld` so the client knows the new
    /// file was not necessarily used.
    #[tracing::instrument(skip(self, token, bytes), fields(size = bytes.len()))]
    pub async fn accept(
        &self,
        order_id: &OrderId,
        token: &str,
        content_type: Option<&str>,
        bytes: Bytes,
    ) -> Result<StoredArtwork> {
        let extension = self.validate(order_id, token, content_type, bytes.len())?;

        let order = self
            .store
            .get(order_id)
            .await?
            .ok_or_else(|| FulfillmentError::OrderNotFound(order_id.clone()))?;
        let state = order.state();
        if matches!(
            state,
            FulfillmentState::AlreadyFulfilled | FulfillmentState::Generating
        ) {
            return Err(FulfillmentError::NotReady {
                order_id: order.id,
                state,
            });
        }

        let path = order
            .artwork_ref
            .clone()
            .unwrap_or_else(|| artwork_path(order_id, extension));
        let size = bytes.len();
        let content_type = content_type.unwrap_or_default();
        self.storage
            .upload(Bucket::Artwork, &path, bytes, content_type)
            .await?;
        let uploaded_at = Utc::now();

        let artwork_ref = self.store.set_artwork_ref(order_id, &path).await?;
        metrics::counter!("artwork_uploads_total").increment(1);
        tracing::info!(artwork_ref = %artwork_ref, "artwork stored");

        let current = self
            .store
            .get(order_id)
            .await?
            .ok_or_else(|| FulfillmentError::OrderNotFound(order_id.clone()))?;
        let raced = current.artifact_ref.is_some()
            || current
                .artifact_claim
                .is_some_and(|claim| claim.claimed_at <= uploaded_at);
        if raced {
            metrics::counter!("artwork_upload_conflicts_total").increment(1);
            tracing::warn!(artwork_ref = %artwork_ref, "artwork replaced while fulfillment was underway");
            return Err(FulfillmentError::ClaimHeld(order_id.clone()));
        }

        Ok(StoredArtwork {
            order_id: order_id.clone(),
            artwork_ref,
            size,
        })
    }
}
