//! The order record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Currency, CupType, FulfillmentState, OrderId};

/// Payment status of an order. Only ever moves `Pending -> Paid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Pending,
    Paid,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OrderStatus::Pending),
            "paid" => Some(OrderStatus::Paid),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A generation-in-progress marker on the artifact slot.
///
/// Exactly one handler holds the claim for an order at a time; a claim older
/// than the configured staleness window may be taken over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactClaim {
    pub token: Uuid,
    pub claimed_at: DateTime<Utc>,
}

impl ArtifactClaim {
    /// Creates a claim with a fresh random token.
    pub fn new(claimed_at: DateTime<Utc>) -> Self {
        Self {
            token: Uuid::new_v4(),
            claimed_at,
        }
    }

    /// Returns true if the claim was taken before `stale_before`.
    pub fn is_stale(&self, stale_before: DateTime<Utc>) -> bool {
        self.claimed_at < stale_before
    }
}

/// One customer purchase awaiting print fulfillment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub status: OrderStatus,
    pub cup_type: CupType,
    pub currency: Option<Currency>,
    pub amount_minor: Option<i64>,
    pub artwork_ref: Option<String>,
    pub artifact_ref: Option<String>,
    pub artifact_claim: Option<ArtifactClaim>,
    pub notification_sent: bool,
    pub notification_sent_at: Option<DateTime<Utc>>,
    pub payment_intent_ref: Option<String>,
    pub checkout_session_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Creates a pending order with no payment, artwork or artifact.
    pub fn pending(id: OrderId, cup_type: CupType) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: OrderStatus::Pending,
            cup_type,
            currency: None,
            amount_minor: None,
            artwork_ref: None,
            artifact_ref: None,
            artifact_claim: None,
            notification_sent: false,
            notification_sent_at: None,
            payment_intent_ref: None,
            checkout_session_ref: None,
            created_at: now,
            paid_at: None,
            updated_at: now,
        }
    }

    /// Sets the settlement currency.
    pub fn with_currency(mut self, currency: Currency) -> Self {
        self.currency = Some(currency);
        self
    }

    /// Sets the payment-intent correlation key.
    pub fn with_payment_intent(mut self, reference: impl Into<String>) -> Self {
        self.payment_intent_ref = Some(reference.into());
        self
    }

    /// Sets the checkout-session correlation key.
    pub fn with_checkout_session(mut self, reference: impl Into<String>) -> Self {
        self.checkout_session_ref = Some(reference.into());
        self
    }

    /// Infers the fulfillment state from the stored fields.
    pub fn state(&self) -> FulfillmentState {
        FulfillmentState::infer(self)
    }

    pub fn is_paid(&self) -> bool {
        self.status == OrderStatus::Paid
    }

    /// True when the artifact exists but the notification never went out.
    pub fn needs_notification(&self) -> bool {
        self.artifact_ref.is_some() && !self.notification_sent
    }
}
