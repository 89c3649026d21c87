//! Order resolution for payment events.
//!
//! Correlation keys are tried in a fixed order by a chain of strategies:
//! explicit order id from metadata, then payment intent, then checkout
//! session. When nothing matches, an order is created from the event.

use async_trait::async_trait;
use common::OrderId;
use order_store::{Order, OrderStore};

use crate::error::{FulfillmentError, Result};
use crate::ingestion::PaymentSucceeded;

/// One link in the resolution chain.
#[async_trait]
pub trait ResolveStrategy<S: OrderStore>: Send + Sync {
    /// Short name recorded in logs and on the [`Resolution`].
    fn name(&self) -> &'static str;

    /// Returns the matching order id, or `None` to defer to the next strategy.
    async fn resolve(&self, store: &S, event: &PaymentSucceeded) -> Result<Option<OrderId>>;
}

/// Matches on `metadata.order_id`, but only if that order exists.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExplicitOrderId;

#[async_trait]
impl<S: OrderStore> ResolveStrategy<S> for ExplicitOrderId {
    fn name(&self) -> &'static str {
        "explicit_order_id"
    }

    async fn resolve(&self, store: &S, event: &PaymentSucceeded) -> Result<Option<OrderId>> {
        let Some(id) = &event.order_id else {
            return Ok(None);
        };
        Ok(store.get(id).await?.map(|order| order.id))
    }
}

/// Matches on the payment intent reference.
#[derive(Debug, Clone, Copy, Default)]
pub struct PaymentIntentLookup;

#[async_trait]
impl<S: OrderStore> ResolveStrategy<S> for PaymentIntentLookup {
    fn name(&self) -> &'static str {
        "payment_intent"
    }

    async fn resolve(&self, store: &S, event: &PaymentSucceeded) -> Result<Option<OrderId>> {
        let Some(reference) = &event.payment_intent_ref else {
            return Ok(None);
        };
        Ok(store
            .find_by_payment_intent(reference)
            .await?
            .map(|order| order.id))
    }
}

/// Matches on the checkout session reference.
#[derive(Debug, Clone, Copy, Default)]
pub struct CheckoutSessionLookup;

#[async_trait]
impl<S: OrderStore> ResolveStrategy<S> for CheckoutSessionLookup {
    fn name(&self) -> &'static str {
        "checkout_session"
    }

    async fn resolve(&self, store: &S, event: &PaymentSucceeded) -> Result<Option<OrderId>> {
        let Some(reference) = &event.checkout_session_ref else {
            return Ok(None);
        };
        Ok(store
            .find_by_checkout_session(reference)
            .await?
            .map(|order| order.id))
    }
}

/// The order a payment event belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub order_id: OrderId,
    /// Which strategy matched, or `"created"` for the fallback path.
    pub matched_by: &'static str,
    pub created: bool,
}

/// Resolves payment events to orders.
pub struct OrderResolver<S: OrderStore> {
    store: S,
    strategies: Vec<Box<dyn ResolveStrategy<S>>>,
}

impl<S: OrderStore + 'static> OrderResolver<S> {
    /// Creates a resolver with the standard precedence.
    pub fn new(store: S) -> Self {
        Self::with_strategies(
            store,
            vec![
                Box::new(ExplicitOrderId),
                Box::new(PaymentIntentLookup),
                Box::new(CheckoutSessionLookup),
            ],
        )
    }

    /// Creates a resolver with a custom strategy chain.
    pub fn with_strategies(store: S, strategies: Vec<Box<dyn ResolveStrategy<S>>>) -> Self {
        Self { store, strategies }
    }

    /// Resolves the event to an order id, creating the order if none matches.
    ///
    /// The same event always resolves to the same order: after resolution its
    /// external references are attached, so later deliveries match by lookup.
    #[tracing::instrument(skip(self, event), fields(
        payment_intent = event.payment_intent_ref.as_deref(),
        checkout_session = event.checkout_session_ref.as_deref(),
    ))]
    pub async fn resolve(&self, event: &PaymentSucceeded) -> Result<Resolution> {
        if let Some(resolution) = self.run_chain(event).await? {
            return Ok(resolution);
        }

        let order = self.order_from_event(event)?;
        let order_id = order.id.clone();
        match self.store.insert(order).await {
            Ok(()) => {
                tracing::info!(order_id = %order_id, "order created from payment event");
                metrics::counter!("orders_created_from_payment_total").increment(1);
                Ok(Resolution {
                    order_id,
                    matched_by: "created",
                    created: true,
                })
            }
            Err(e) if e.is_conflict() => {
                // A concurrent delivery of the same event created it first.
                tracing::debug!(order_id = %order_id, error = %e, "creation raced; re-resolving");
                self.run_chain(event).await?.ok_or_else(|| {
                    FulfillmentError::UnresolvedOrder(format!(
                        "order creation conflicted but no order matches: {e}"
                    ))
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn run_chain(&self, event: &PaymentSucceeded) -> Result<Option<Resolution>> {
        for strategy in &self.strategies {
            if let Some(order_id) = strategy.resolve(&self.store, event).await? {
                self.attach_refs(&order_id, event).await?;
                tracing::debug!(order_id = %order_id, strategy = strategy.name(), "order resolved");
                return Ok(Some(Resolution {
                    order_id,
                    matched_by: strategy.name(),
                    created: false,
                }));
            }
        }
        Ok(None)
    }

    async fn attach_refs(&self, order_id: &OrderId, event: &PaymentSucceeded) -> Result<()> {
        if event.payment_intent_ref.is_none() && event.checkout_session_ref.is_none() {
            return Ok(());
        }
        match self
            .store
            .attach_payment_refs(
                order_id,
                event.payment_intent_ref.as_deref(),
                event.checkout_session_ref.as_deref(),
            )
            .await
        {
            Ok(_) => Ok(()),
            // The resolved order stays authoritative; the reference belongs elsewhere.
            Err(e) if e.is_conflict() => {
                tracing::warn!(order_id = %order_id, error = %e, "payment reference owned by another order");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn order_from_event(&self, event: &PaymentSucceeded) -> Result<Order> {
        if !event.has_correlation() {
            return Err(FulfillmentError::UnresolvedOrder(
                "event carries no order id or payment reference".to_string(),
            ));
        }
        let currency = event.currency.clone().ok_or_else(|| {
            FulfillmentError::UnresolvedOrder("event carries no currency".to_string())
        })?;

        let id = event.order_id.clone().unwrap_or_default();
        let mut order = Order::pending(id, event.cup_type.unwrap_or_default()).with_currency(currency);
        if let Some(reference) = &event.payment_intent_ref {
            order = order.with_payment_intent(reference.clone());
        }
        if let Some(reference) = &event.checkout_session_ref {
            order = order.with_checkout_session(reference.clone());
        }
        Ok(order)
    }
}
