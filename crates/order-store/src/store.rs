use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{ArtifactClaim, Currency, Order, OrderId, Result};

/// Options for claiming an order's artifact slot.
#[derive(Debug, Clone, Copy)]
pub struct ClaimOptions {
    /// Existing claims taken before this instant are considered abandoned.
    pub stale_before: DateTime<Utc>,
    /// Claim even if an artifact already exists (operator regeneration).
    pub force: bool,
}

impl ClaimOptions {
    /// Creates options for a normal, first-time claim.
    pub fn new(stale_before: DateTime<Utc>) -> Self {
        Self {
            stale_before,
            force: false,
        }
    }

    /// Creates options that ignore an existing artifact.
    pub fn forced(stale_before: DateTime<Utc>) -> Self {
        Self {
            stale_before,
            force: true,
        }
    }
}

/// Amount and currency merged onto an order by the `pending -> paid` transition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaymentDetails {
    pub amount_minor: Option<i64>,
    pub currency: Option<Currency>,
    pub paid_at: Option<DateTime<Utc>>,
}

/// Core trait for order store implementations.
///
/// Every method that decides fulfillment progress is a single conditional
/// update: it either applies completely or reports that its precondition no
/// longer held. Callers must never emulate these with a read followed by a
/// plain write.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Inserts a new order.
    ///
    /// Fails with `DuplicateOrder` if the id exists, or `DuplicateReference`
    /// if one of its external payment references is already taken.
    async fn insert(&self, order: Order) -> Result<()>;

    /// Loads an order by id.
    async fn get(&self, id: &OrderId) -> Result<Option<Order>>;

    /// Finds the order owning a payment-intent reference.
    async fn find_by_payment_intent(&self, reference: &str) -> Result<Option<Order>>;

    /// Finds the order owning a checkout-session reference.
    async fn find_by_checkout_session(&self, reference: &str) -> Result<Option<Order>>;

    /// Fills in external references that are still unset on the order.
    ///
    /// References already set are left untouched. Returns the updated order.
    async fn attach_payment_refs(
        &self,
        id: &OrderId,
        payment_intent_ref: Option<&str>,
        checkout_session_ref: Option<&str>,
    ) -> Result<Order>;

    /// Transitions the order from `pending` to `paid`, merging the payment details.
    ///
    /// Returns `false` without writing anything if the order was already paid.
    async fn mark_paid(&self, id: &OrderId, payment: PaymentDetails) -> Result<bool>;

    /// Records the artwork reference if none is set yet.
    ///
    /// Returns the reference stored on the order afterwards, which is the
    /// pre-existing one when the order already had artwork.
    async fn set_artwork_ref(&self, id: &OrderId, artwork_ref: &str) -> Result<String>;

    /// Atomically claims the artifact slot.
    ///
    /// Succeeds only if the order has no artifact (unless `options.force`) and
    /// no claim newer than `options.stale_before`.
    async fn try_claim_artifact(
        &self,
        id: &OrderId,
        claim: ArtifactClaim,
        options: ClaimOptions,
    ) -> Result<bool>;

    /// Stores the artifact reference and clears the claim, if `token` still
    /// holds it. Returns `false` if the claim was lost in the meantime.
    async fn complete_artifact(&self, id: &OrderId, token: Uuid, artifact_ref: &str)
    -> Result<bool>;

    /// Clears the claim if `token` still holds it.
    async fn release_claim(&self, id: &OrderId, token: Uuid) -> Result<bool>;

    /// Marks the notification as sent. Only applies when an artifact exists.
    async fn mark_notification_sent(&self, id: &OrderId, at: DateTime<Utc>) -> Result<bool>;

    /// Lists paid orders with artwork whose artifact or notification is missing.
    async fn list_unfulfilled(&self, limit: usize) -> Result<Vec<Order>>;
}

/// Extension trait providing convenience methods for order stores.
#[async_trait]
pub trait OrderStoreExt: OrderStore {
    /// Loads an order, failing with `NotFound` if it does not exist.
    async fn require(&self, id: &OrderId) -> Result<Order> {
        self.get(id)
            .await?
            .ok_or_else(|| crate::OrderStoreError::NotFound(id.clone()))
    }
}

impl<T: OrderStore + ?Sized> OrderStoreExt for T {}
