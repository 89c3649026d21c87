use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    ArtifactClaim, Order, OrderId, OrderStatus, OrderStoreError, Result,
    store::{ClaimOptions, OrderStore, PaymentDetails},
};

#[derive(Debug, Default)]
struct Tables {
    orders: HashMap<OrderId, Order>,
    by_payment_intent: HashMap<String, OrderId>,
    by_checkout_session: HashMap<String, OrderId>,
}

impl Tables {
    fn order_mut(&mut self, id: &OrderId) -> Result<&mut Order> {
        self.orders
            .get_mut(id)
            .ok_or_else(|| OrderStoreError::NotFound(id.clone()))
    }

    fn check_reference(
        index: &HashMap<String, OrderId>,
        field: &'static str,
        reference: &str,
        owner: &OrderId,
    ) -> Result<()> {
        match index.get(reference) {
            Some(existing) if existing != owner => Err(OrderStoreError::DuplicateReference {
                field,
                value: reference.to_string(),
            }),
            _ => Ok(()),
        }
    }
}

/// In-memory order store implementation for testing.
///
/// Every operation runs under a single write lock, which gives the same
/// all-or-nothing semantics as the conditional updates of the PostgreSQL
/// implementation.
#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryOrderStore {
    /// Creates a new empty in-memory order store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of orders stored.
    pub async fn order_count(&self) -> usize {
        self.tables.read().await.orders.len()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert(&self, order: Order) -> Result<()> {
        let mut tables = self.tables.write().await;

        if tables.orders.contains_key(&order.id) {
            return Err(OrderStoreError::DuplicateOrder(order.id));
        }
        if let Some(ref pi) = order.payment_intent_ref
            && tables.by_payment_intent.contains_key(pi)
        {
            return Err(OrderStoreError::DuplicateReference {
                field: "payment_intent_ref",
                value: pi.clone(),
            });
        }
        if let Some(ref cs) = order.checkout_session_ref
            && tables.by_checkout_session.contains_key(cs)
        {
            return Err(OrderStoreError::DuplicateReference {
                field: "checkout_session_ref",
                value: cs.clone(),
            });
        }

        if let Some(ref pi) = order.payment_intent_ref {
            tables.by_payment_intent.insert(pi.clone(), order.id.clone());
        }
        if let Some(ref cs) = order.checkout_session_ref {
            tables
                .by_checkout_session
                .insert(cs.clone(), order.id.clone());
        }
        tables.orders.insert(order.id.clone(), order);
        Ok(())
    }

    async fn get(&self, id: &OrderId) -> Result<Option<Order>> {
        Ok(self.tables.read().await.orders.get(id).cloned())
    }

    async fn find_by_payment_intent(&self, reference: &str) -> Result<Option<Order>> {
        let tables = self.tables.read().await;
        Ok(tables
            .by_payment_intent
            .get(reference)
            .and_then(|id| tables.orders.get(id))
            .cloned())
    }

    async fn find_by_checkout_session(&self, reference: &str) -> Result<Option<Order>> {
        let tables = self.tables.read().await;
        Ok(tables
            .by_checkout_session
            .get(reference)
            .and_then(|id| tables.orders.get(id))
            .cloned())
    }

    async fn attach_payment_refs(
        &self,
        id: &OrderId,
        payment_intent_ref: Option<&str>,
        checkout_session_ref: Option<&str>,
    ) -> Result<Order> {
        let mut guard = self.tables.write().await;
        let tables = &mut *guard;
        let order = tables
            .orders
            .get(id)
            .ok_or_else(|| OrderStoreError::NotFound(id.clone()))?;

        let new_pi = payment_intent_ref.filter(|_| order.payment_intent_ref.is_none());
        let new_cs = checkout_session_ref.filter(|_| order.checkout_session_ref.is_none());

        // Validate both before writing either.
        if let Some(pi) = new_pi {
            Tables::check_reference(&tables.by_payment_intent, "payment_intent_ref", pi, id)?;
        }
        if let Some(cs) = new_cs {
            Tables::check_reference(
                &tables.by_checkout_session,
                "checkout_session_ref",
                cs,
                id,
            )?;
        }

        if let Some(pi) = new_pi {
            tables.by_payment_intent.insert(pi.to_string(), id.clone());
        }
        if let Some(cs) = new_cs {
            tables.by_checkout_session.insert(cs.to_string(), id.clone());
        }

        let order = tables.order_mut(id)?;
        if let Some(pi) = new_pi {
            order.payment_intent_ref = Some(pi.to_string());
        }
        if let Some(cs) = new_cs {
            order.checkout_session_ref = Some(cs.to_string());
        }
        if new_pi.is_some() || new_cs.is_some() {
            order.updated_at = Utc::now();
        }
        Ok(order.clone())
    }

    async fn mark_paid(&self, id: &OrderId, payment: PaymentDetails) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let order = tables.order_mut(id)?;

        if order.status == OrderStatus::Paid {
            return Ok(false);
        }

        let now = Utc::now();
        order.status = OrderStatus::Paid;
        if payment.amount_minor.is_some() {
            order.amount_minor = payment.amount_minor;
        }
        if payment.currency.is_some() {
            order.currency = payment.currency;
        }
        order.paid_at = Some(payment.paid_at.unwrap_or(now));
        order.updated_at = now;
        Ok(true)
    }

    async fn set_artwork_ref(&self, id: &OrderId, artwork_ref: &str) -> Result<String> {
        let mut tables = self.tables.write().await;
        let order = tables.order_mut(id)?;

        if let Some(ref existing) = order.artwork_ref {
            return Ok(existing.clone());
        }
        order.artwork_ref = Some(artwork_ref.to_string());
        order.updated_at = Utc::now();
        Ok(artwork_ref.to_string())
    }

    async fn try_claim_artifact(
        &self,
        id: &OrderId,
        claim: ArtifactClaim,
        options: ClaimOptions,
    ) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let order = tables.order_mut(id)?;

        if order.artifact_ref.is_some() && !options.force {
            return Ok(false);
        }
        if let Some(existing) = order.artifact_claim {
            if !existing.is_stale(options.stale_before) {
                return Ok(false);
            }
            tracing::warn!(
                order_id = %id,
                stale_claimed_at = %existing.claimed_at,
                "taking over stale artifact claim"
            );
        }

        order.artifact_claim = Some(claim);
        order.updated_at = Utc::now();
        Ok(true)
    }

    async fn complete_artifact(
        &self,
        id: &OrderId,
        token: Uuid,
        artifact_ref: &str,
    ) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let order = tables.order_mut(id)?;

        if order.artifact_claim.map(|c| c.token) != Some(token) {
            tracing::debug!(order_id = %id, "artifact completion rejected; claim no longer held");
            return Ok(false);
        }
        order.artifact_ref = Some(artifact_ref.to_string());
        order.artifact_claim = None;
        order.updated_at = Utc::now();
        Ok(true)
    }

    async fn release_claim(&self, id: &OrderId, token: Uuid) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let order = tables.order_mut(id)?;

        if order.artifact_claim.map(|c| c.token) != Some(token) {
            return Ok(false);
        }
        order.artifact_claim = None;
        order.updated_at = Utc::now();
        Ok(true)
    }

    async fn mark_notification_sent(&self, id: &OrderId, at: DateTime<Utc>) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let order = tables.order_mut(id)?;

        if order.artifact_ref.is_none() {
            return Ok(false);
        }
        order.notification_sent = true;
        order.notification_sent_at = Some(at);
        order.updated_at = Utc::now();
        Ok(true)
    }

    async fn list_unfulfilled(&self, limit: usize) -> Result<Vec<Order>> {
        let tables = self.tables.read().await;
        let mut orders: Vec<_> = tables
            .orders
            .values()
            .filter(|o| {
                o.is_paid()
                    && o.artwork_ref.is_some()
                    && (o.artifact_ref.is_none() || !o.notification_sent)
            })
            .cloned()
            .collect();
        orders.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        orders.truncate(limit);
        Ok(orders)
    }
}
