//! Reconciliation engine: the join between payment and artwork.
//!
//! Either signal may arrive first, twice, or at the same moment as the
//! other. Whichever handler observes `ReadyToFulfill` races for the artifact
//! claim; only the winner generates and notifies. Losers report
//! [`ReconcileOutcome::ClaimLost`] and touch nothing.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use common::OrderId;
use order_store::{
    ArtifactClaim, ClaimOptions, FulfillmentState, Order, OrderStore, PaymentDetails,
};
use serde::Serialize;
use uuid::Uuid;

use crate::artifact::ArtifactGenerator;
use crate::error::{FulfillmentError, Result};
use crate::ingestion::PaymentSucceeded;
use crate::notify::NotificationDispatcher;
use crate::resolver::{OrderResolver, Resolution};
use crate::services::{Bucket, SharedObjectStorage};

/// Timeouts and claim staleness for fulfillment.
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub generation_timeout: Duration,
    pub dispatch_timeout: Duration,
    /// Claims older than this may be taken over by another handler.
    pub claim_stale_after: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            generation_timeout: Duration::from_secs(60),
            dispatch_timeout: Duration::from_secs(30),
            claim_stale_after: Duration::from_secs(10 * 60),
        }
    }
}

/// What a reconciliation attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    AwaitingPayment,
    AwaitingArtwork,
    /// This call generated the artifact. `notified` is false when dispatch
    /// failed; the order can then be retried through `resend_notification`.
    Fulfilled { notified: bool },
    AlreadyFulfilled,
    /// Another handler holds the claim.
    ClaimLost,
}

impl ReconcileOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileOutcome::AwaitingPayment => "awaiting_payment",
            ReconcileOutcome::AwaitingArtwork => "awaiting_artwork",
            ReconcileOutcome::Fulfilled { .. } => "fulfilled",
            ReconcileOutcome::AlreadyFulfilled => "already_fulfilled",
            ReconcileOutcome::ClaimLost => "claim_lost",
        }
    }
}

/// The durable part of handling a payment event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRecorded {
    pub resolution: Resolution,
    /// False when the order was already paid (duplicate delivery).
    pub newly_paid: bool,
}

/// Drives orders from paid-with-artwork to fulfilled-and-notified.
pub struct ReconciliationEngine<S: OrderStore> {
    store: S,
    resolver: OrderResolver<S>,
    generator: ArtifactGenerator,
    dispatcher: NotificationDispatcher,
    storage: SharedObjectStorage,
    settings: EngineSettings,
}

impl<S: OrderStore + Clone + 'static> ReconciliationEngine<S> {
    pub fn new(
        store: S,
        storage: SharedObjectStorage,
        dispatcher: NotificationDispatcher,
        settings: EngineSettings,
    ) -> Self {
        Self {
            resolver: OrderResolver::new(store.clone()),
            generator: ArtifactGenerator::new(storage.clone()),
            store,
            dispatcher,
            storage,
            settings,
        }
    }

    /// Replaces the default resolver.
    pub fn with_resolver(mut self, resolver: OrderResolver<S>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Resolves the event's order and applies the `pending -> paid` transition.
    ///
    /// Once this returns, the payment is durably recorded and the delivery can
    /// be acknowledged. Amount and currency are only merged by the transition,
    /// so redelivery cannot change them.
    #[tracing::instrument(skip(self, event), fields(event_id = event.event_id.as_deref()))]
    pub async fn record_payment(&self, event: &PaymentSucceeded) -> Result<PaymentRecorded> {
        let resolution = self.resolver.resolve(event).await?;

        let newly_paid = self
            .store
            .mark_paid(
                &resolution.order_id,
                PaymentDetails {
                    amount_minor: event.amount_minor,
                    currency: event.currency.clone(),
                    paid_at: Some(Utc::now()),
                },
            )
            .await?;

        if newly_paid {
            metrics::counter!("orders_paid_total").increment(1);
            tracing::info!(order_id = %resolution.order_id, matched_by = resolution.matched_by, "order marked paid");
        } else {
            metrics::counter!("duplicate_payment_events_total").increment(1);
            tracing::debug!(order_id = %resolution.order_id, "order already paid; duplicate payment event");
        }

        Ok(PaymentRecorded {
            resolution,
            newly_paid,
        })
    }

    /// Payment entry point: record the payment, then try to fulfill.
    pub async fn on_payment_succeeded(
        &self,
        event: &PaymentSucceeded,
    ) -> Result<(PaymentRecorded, ReconcileOutcome)> {
        let recorded = self.record_payment(event).await?;
        let outcome = self.reconcile(&recorded.resolution.order_id).await?;
        Ok((recorded, outcome))
    }

    /// Artwork entry point, called after the artwork reference is stored.
    pub async fn on_artwork_uploaded(&self, order_id: &OrderId) -> Result<ReconcileOutcome> {
        self.reconcile(order_id).await
    }

    /// Fulfills the order if it is ready; otherwise reports why not.
    ///
    /// Safe to call any number of times from any number of handlers.
    #[tracing::instrument(skip(self), fields(order_id = %order_id))]
    pub async fn reconcile(&self, order_id: &OrderId) -> Result<ReconcileOutcome> {
        let order = self.load(order_id).await?;

        let state = order.state();
        let outcome = match state {
            FulfillmentState::AwaitingPayment => ReconcileOutcome::AwaitingPayment,
            FulfillmentState::AwaitingArtwork => ReconcileOutcome::AwaitingArtwork,
            // A live claim will make the claim below fail; a stale one is taken over.
            _ if state.can_fulfill() => self.fulfill(&order, false).await?,
            _ => ReconcileOutcome::AlreadyFulfilled,
        };

        metrics::counter!("reconcile_outcomes_total", "outcome" => outcome.as_str()).increment(1);
        tracing::debug!(outcome = outcome.as_str(), "reconciled");
        Ok(outcome)
    }

    /// Regenerates the artifact even if one exists, then re-notifies.
    ///
    /// Fails with `NotReady` unless the order is paid with artwork, and with
    /// `ClaimHeld` if another handler is generating right now.
    #[tracing::instrument(skip(self), fields(order_id = %order_id))]
    pub async fn regenerate(&self, order_id: &OrderId) -> Result<ReconcileOutcome> {
        let order = self.load(order_id).await?;
        if !order.is_paid() || order.artwork_ref.is_none() {
            return Err(FulfillmentError::NotReady {
                order_id: order.id.clone(),
                state: order.state(),
            });
        }

        match self.fulfill(&order, true).await? {
            ReconcileOutcome::ClaimLost => Err(FulfillmentError::ClaimHeld(order.id)),
            outcome => {
                tracing::info!(outcome = outcome.as_str(), "artifact regenerated by operator");
                Ok(outcome)
            }
        }
    }

    /// Re-sends the notification with a fresh signed link.
    ///
    /// Re-checks that the artifact object still exists before sending.
    #[tracing::instrument(skip(self), fields(order_id = %order_id))]
    pub async fn resend_notification(&self, order_id: &OrderId) -> Result<()> {
        let order = self.load(order_id).await?;
        let Some(artifact_ref) = order.artifact_ref.as_deref() else {
            return Err(FulfillmentError::ArtifactMissing(order.id.clone()));
        };
        if !self.storage.exists(Bucket::Artifacts, artifact_ref).await? {
            tracing::warn!(artifact_ref, "artifact recorded on order but missing from storage");
            return Err(FulfillmentError::ArtifactMissing(order.id.clone()));
        }

        self.notify(&order).await
    }

    async fn load(&self, order_id: &OrderId) -> Result<Order> {
        self.store
            .get(order_id)
            .await?
            .ok_or_else(|| FulfillmentError::OrderNotFound(order_id.clone()))
    }

    async fn fulfill(&self, order: &Order, force: bool) -> Result<ReconcileOutcome> {
        let Some(artwork_ref) = order.artwork_ref.clone() else {
            return Ok(ReconcileOutcome::AwaitingArtwork);
        };

        let now = Utc::now();
        let stale_before = chrono::Duration::from_std(self.settings.claim_stale_after)
            .ok()
            .and_then(|age| now.checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let options = if force {
            ClaimOptions::forced(stale_before)
        } else {
            ClaimOptions::new(stale_before)
        };

        let claim = ArtifactClaim::new(now);
        if !self
            .store
            .try_claim_artifact(&order.id, claim, options)
            .await?
        {
            metrics::counter!("fulfillment_claims_total", "result" => "lost").increment(1);
            tracing::debug!("artifact claim lost");
            return Ok(ReconcileOutcome::ClaimLost);
        }
        metrics::counter!("fulfillment_claims_total", "result" => "won").increment(1);

        let started = Instant::now();
        let artifact_ref = match self.generate(order, &artwork_ref, claim.token).await {
            Ok(reference) => reference,
            Err(e) => {
                metrics::counter!("fulfillment_failures_total", "stage" => "generation")
                    .increment(1);
                return Err(e);
            }
        };

        if !self
            .store
            .complete_artifact(&order.id, claim.token, &artifact_ref)
            .await?
        {
            // Our claim went stale and someone else took over.
            tracing::warn!("claim taken over before artifact was recorded");
            return Ok(ReconcileOutcome::ClaimLost);
        }
        metrics::histogram!("fulfillment_duration_seconds").record(started.elapsed().as_secs_f64());
        tracing::info!(artifact_ref = %artifact_ref, "artifact recorded");

        // Reload so the message reflects the stored artifact and payment.
        let fulfilled = self.load(&order.id).await?;
        let notified = match self.notify(&fulfilled).await {
            Ok(()) => true,
            Err(e) => {
                metrics::counter!("fulfillment_failures_total", "stage" => "dispatch").increment(1);
                tracing::error!(error = %e, "notification failed; operator resend required");
                false
            }
        };

        Ok(ReconcileOutcome::Fulfilled { notified })
    }

    /// Runs generation under the timeout, releasing the claim on failure.
    async fn generate(&self, order: &Order, artwork_ref: &str, token: Uuid) -> Result<String> {
        let attempt = tokio::time::timeout(
            self.settings.generation_timeout,
            self.generator.generate(&order.id, artwork_ref, order.cup_type),
        )
        .await;

        let error = match attempt {
            Ok(Ok(reference)) => return Ok(reference),
            Ok(Err(e)) => {
                tracing::error!(error = %e, kind = e.kind(), "artifact generation failed");
                FulfillmentError::Generation(e)
            }
            Err(_) => {
                tracing::error!("artifact generation timed out");
                FulfillmentError::Timeout {
                    stage: "artifact generation",
                }
            }
        };

        if let Err(release_error) = self.store.release_claim(&order.id, token).await {
            // The claim will go stale and become claimable again.
            tracing::warn!(error = %release_error, "failed to release artifact claim");
        }
        Err(error)
    }

    /// Dispatches under the timeout and records delivery.
    async fn notify(&self, order: &Order) -> Result<()> {
        tokio::time::timeout(self.settings.dispatch_timeout, self.dispatcher.dispatch(order))
            .await
            .map_err(|_| FulfillmentError::Timeout {
                stage: "notification dispatch",
            })??;

        self.store
            .mark_notification_sent(&order.id, Utc::now())
            .await?;
        Ok(())
    }
}
