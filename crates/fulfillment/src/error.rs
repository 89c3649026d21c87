//! Fulfillment error types.

use common::OrderId;
use order_store::{FulfillmentState, OrderStoreError};
use thiserror::Error;

/// Why the print artifact could not be produced.
///
/// None of these mark the order as fulfilled; the order stays
/// `ReadyToFulfill` so a later retry can succeed.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// The artwork object could not be fetched from storage.
    #[error("Artwork download failed: {0}")]
    Download(String),

    /// The artwork bytes are not a supported image.
    #[error("Artwork could not be decoded: {0}")]
    Decode(String),

    /// The print document could not be assembled.
    #[error("Print document could not be rendered: {0}")]
    Render(String),

    /// The finished artifact could not be stored.
    #[error("Artifact upload failed: {0}")]
    Upload(String),
}

impl GenerationError {
    /// Returns true when the same artwork may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, GenerationError::Download(_) | GenerationError::Upload(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            GenerationError::Download(_) => "download",
            GenerationError::Decode(_) => "decode",
            GenerationError::Render(_) => "render",
            GenerationError::Upload(_) => "upload",
        }
    }
}

/// Errors that can occur anywhere in the fulfillment pipeline.
#[derive(Debug, Error)]
pub enum FulfillmentError {
    /// Bad webhook signature, upload token or admin token.
    #[error("Authenticity check failed: {0}")]
    Authenticity(String),

    /// The event body passed authentication but is not a valid event.
    #[error("Malformed event: {0}")]
    Malformed(String),

    /// A payment event could not be matched to or create an order.
    #[error("Payment event could not be matched to an order: {0}")]
    UnresolvedOrder(String),

    /// Order store failure.
    #[error("Order store error: {0}")]
    Store(#[from] OrderStoreError),

    /// Object storage failure.
    #[error("Object storage error: {0}")]
    Storage(String),

    /// A requested object does not exist in storage.
    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    /// Artifact generation failed.
    #[error("Artifact generation failed: {0}")]
    Generation(#[from] GenerationError),

    /// The notification could not be delivered.
    #[error("Notification dispatch failed: {0}")]
    Dispatch(String),

    /// A bounded stage did not finish in time.
    #[error("{stage} timed out")]
    Timeout { stage: &'static str },

    /// No order exists with this id.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// The order has no stored print artifact.
    #[error("Order {0} has no print artifact")]
    ArtifactMissing(OrderId),

    /// The order is not in a state that allows the requested action.
    #[error("Order {order_id} is {state}")]
    NotReady {
        order_id: OrderId,
        state: FulfillmentState,
    },

    /// Another handler currently holds the artifact claim.
    #[error("Order {0} is already being fulfilled")]
    ClaimHeld(OrderId),

    /// Uploaded artwork exceeds the size ceiling.
    #[error("Artwork is {size} bytes; the limit is {limit}")]
    TooLarge { size: usize, limit: usize },

    /// Uploaded artwork has a content type outside the allow-list.
    #[error("Unsupported artwork content type: {0}")]
    UnsupportedMediaType(String),
}

impl FulfillmentError {
    /// Returns true when the caller should retry the same request later.
    pub fn is_retryable(&self) -> bool {
        match self {
            FulfillmentError::Store(e) => e.is_transient(),
            FulfillmentError::Storage(_)
            | FulfillmentError::Timeout { .. }
            | FulfillmentError::Dispatch(_) => true,
            FulfillmentError::Generation(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Convenience type alias for fulfillment results.
pub type Result<T> = std::result::Result<T, FulfillmentError>;
