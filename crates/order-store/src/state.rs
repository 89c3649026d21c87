//! Fulfillment state inferred from the order record.

use serde::{Deserialize, Serialize};

use crate::Order;

/// Where an order stands in the payment/artwork join.
///
/// ```text
/// AwaitingPayment ──(paid)──► AwaitingArtwork ──(artwork)──► ReadyToFulfill
///        │                                                      │  ▲
///        └──────────(artwork, then paid)───────────────────────►│  │ (claim released)
///                                                      (claim)  ▼  │
///                                                            Generating ──► AlreadyFulfilled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FulfillmentState {
    /// Payment has not been confirmed yet.
    AwaitingPayment,
    /// Paid, but no artwork has been uploaded.
    AwaitingArtwork,
    /// Paid with artwork; nobody holds the artifact claim.
    ReadyToFulfill,
    /// Paid with artwork; a handler holds the artifact claim.
    Generating,
    /// The print artifact exists.
    AlreadyFulfilled,
}

impl FulfillmentState {
    /// Derives the state from an order's stored fields.
    pub fn infer(order: &Order) -> Self {
        if order.artifact_ref.is_some() {
            FulfillmentState::AlreadyFulfilled
        } else if !order.is_paid() {
            FulfillmentState::AwaitingPayment
        } else if order.artwork_ref.is_none() {
            FulfillmentState::AwaitingArtwork
        } else if order.artifact_claim.is_some() {
            FulfillmentState::Generating
        } else {
            FulfillmentState::ReadyToFulfill
        }
    }

    /// Returns true if a handler observing this state should try to claim.
    pub fn can_fulfill(&self) -> bool {
        matches!(
            self,
            FulfillmentState::ReadyToFulfill | FulfillmentState::Generating
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FulfillmentState::AwaitingPayment => "AwaitingPayment",
            FulfillmentState::AwaitingArtwork => "AwaitingArtwork",
            FulfillmentState::ReadyToFulfill => "ReadyToFulfill",
            FulfillmentState::Generating => "Generating",
            FulfillmentState::AlreadyFulfilled => "AlreadyFulfilled",
        }
    }
}

impl std::fmt::Display for FulfillmentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
