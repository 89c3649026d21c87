//! Order-ready notifications.

use std::time::Duration;

use common::format_amount;
use order_store::Order;

use crate::error::{FulfillmentError, Result};
use crate::services::{Bucket, SharedEmailService, SharedObjectStorage, SignedUrl};

/// Default lifetime of the download link in a notification (7 days).
pub const DEFAULT_LINK_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Builds the subject and body for an order-ready message.
pub fn compose_message(order: &Order, link: &SignedUrl) -> (String, String) {
    let subject = format!("New mug order ready to print: {}", order.id);

    let amount = match (order.amount_minor, &order.currency) {
        (Some(amount), Some(currency)) => format_amount(amount, currency),
        (None, Some(currency)) => format!("unknown amount ({currency})"),
        _ => "unknown amount".to_string(),
    };

    let body = format!(
        "Order: {}\nCup type: {}\nAmount: {}\n\nPrint file: {}\nLink expires: {}\n",
        order.id,
        order.cup_type,
        amount,
        link.url,
        link.expires_at.to_rfc3339(),
    );
    (subject, body)
}

/// Sends the order-ready message with a fresh signed link to the artifact.
///
/// Does not record delivery on the order; the caller does that once this
/// returns successfully.
#[derive(Clone)]
pub struct NotificationDispatcher {
    storage: SharedObjectStorage,
    email: SharedEmailService,
    recipient: String,
    link_ttl: Duration,
}

impl NotificationDispatcher {
    pub fn new(
        storage: SharedObjectStorage,
        email: SharedEmailService,
        recipient: impl Into<String>,
        link_ttl: Duration,
    ) -> Self {
        Self {
            storage,
            email,
            recipient: recipient.into(),
            link_ttl,
        }
    }

    #[tracing::instrument(skip(self, order), fields(order_id = %order.id))]
    pub async fn dispatch(&self, order: &Order) -> Result<()> {
        let artifact_ref = order
            .artifact_ref
            .as_deref()
            .ok_or_else(|| FulfillmentError::ArtifactMissing(order.id.clone()))?;

        let link = self
            .storage
            .create_signed_url(Bucket::Artifacts, artifact_ref, self.link_ttl)
            .await?;
        let (subject, body) = compose_message(order, &link);

        self.email.send(&self.recipient, &subject, &body).await?;
        metrics::counter!("notifications_sent_total").increment(1);
        tracing::info!("order-ready notification sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use common::{CupType, Currency, OrderId};

    use super::*;
    use crate::services::{InMemoryEmailService, InMemoryObjectStorage};

    fn fulfilled_order() -> Order {
        let mut order = Order::pending(OrderId::parse("o1").unwrap(), CupType::Hotzy)
            .with_currency(Currency::parse("CAD").unwrap());
        order.amount_minor = Some(2499);
        order.artwork_ref = Some("o1/wrap.png".to_string());
        order.artifact_ref = Some("o1/print.pdf".to_string());
        order
    }

    fn dispatcher(email: &InMemoryEmailService) -> NotificationDispatcher {
        NotificationDispatcher::new(
            Arc::new(InMemoryObjectStorage::new()),
            Arc::new(email.clone()),
            "print@example.com",
            DEFAULT_LINK_TTL,
        )
    }

    #[tokio::test]
    async fn test_message_contents() {
        let email = InMemoryEmailService::new();
        dispatcher(&email).dispatch(&fulfilled_order()).await.unwrap();

        let sent = email.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "print@example.com");
        assert_eq!(sent[0].subject, "New mug order ready to print: o1");
        assert!(sent[0].body.contains("Cup type: hotzy"));
        assert!(sent[0].body.contains("24.99 CAD"));
        assert!(sent[0].body.contains("artifacts/o1/print.pdf"));
    }

    #[tokio::test]
    async fn test_refuses_without_artifact() {
        let email = InMemoryEmailService::new();
        let mut order = fulfilled_order();
        order.artifact_ref = None;

        let result = dispatcher(&email).dispatch(&order).await;
        assert!(matches!(result, Err(FulfillmentError::ArtifactMissing(_))));
        assert_eq!(email.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_send_failure_surfaces_as_dispatch_error() {
        let email = InMemoryEmailService::new();
        email.set_fail_on_send(true);
        let result = dispatcher(&email).dispatch(&fulfilled_order()).await;
        assert!(matches!(result, Err(FulfillmentError::Dispatch(_))));
    }
}
