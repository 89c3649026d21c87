//! Email service trait and implementations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{FulfillmentError, Result};

/// Trait for outbound email delivery.
#[async_trait]
pub trait EmailService: Send + Sync {
    /// Sends a plain-text message to a single recipient.
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()>;
}

#[async_trait]
impl<T: EmailService + ?Sized> EmailService for Arc<T> {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        (**self).send(to, subject, body).await
    }
}

/// Shared handle to whichever email backend is configured.
pub type SharedEmailService = Arc<dyn EmailService>;

/// Delivers email through a JSON HTTP API (`POST {endpoint}` with a bearer key).
#[derive(Clone)]
pub struct HttpEmailService {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    from: String,
}

#[derive(Debug, Serialize)]
struct OutboundEmail<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    text: &'a str,
}

impl HttpEmailService {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        from: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FulfillmentError::Dispatch(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            from: from.into(),
        })
    }
}

#[async_trait]
impl EmailService for HttpEmailService {
    #[tracing::instrument(skip(self, body))]
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        let payload = OutboundEmail {
            from: &self.from,
            to: [to],
            subject,
            text: body,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| FulfillmentError::Dispatch(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read email API response body".to_string());
            return Err(FulfillmentError::Dispatch(format!(
                "email API returned {}: {message}",
                status.as_u16()
            )));
        }

        Ok(())
    }
}

/// Writes messages to the log instead of delivering them.
///
/// Used when no email API is configured.
#[derive(Debug, Clone, Default)]
pub struct LogEmailService;

#[async_trait]
impl EmailService for LogEmailService {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        tracing::info!(to, subject, body, "email delivery disabled; message logged");
        Ok(())
    }
}

/// A message captured by [`InMemoryEmailService`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Default)]
struct InMemoryEmailState {
    sent: Vec<SentEmail>,
    delay: Option<Duration>,
}

/// In-memory email service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEmailService {
    state: Arc<RwLock<InMemoryEmailState>>,
    fail_on_send: Arc<AtomicBool>,
}

impl InMemoryEmailService {
    /// Creates a new in-memory email service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the service to fail on send calls.
    pub fn set_fail_on_send(&self, fail: bool) {
        self.fail_on_send.store(fail, Ordering::SeqCst);
    }

    /// Delays every send, for exercising dispatch timeouts.
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.state.write().unwrap().delay = delay;
    }

    /// Returns every message sent so far.
    pub fn sent(&self) -> Vec<SentEmail> {
        self.state.read().unwrap().sent.clone()
    }

    /// Returns the number of messages sent so far.
    pub fn sent_count(&self) -> usize {
        self.state.read().unwrap().sent.len()
    }

    /// Returns the number of messages whose subject mentions `needle`.
    pub fn count_mentioning(&self, needle: &str) -> usize {
        self.state
            .read()
            .unwrap()
            .sent
            .iter()
            .filter(|m| m.subject.contains(needle))
            .count()
    }
}

#[async_trait]
impl EmailService for InMemoryEmailService {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        let delay = self.state.read().unwrap().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_on_send.load(Ordering::SeqCst) {
            return Err(FulfillmentError::Dispatch("mailbox unavailable".to_string()));
        }

        self.state.write().unwrap().sent.push(SentEmail {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_messages() {
        let service = InMemoryEmailService::new();
        service
            .send("ops@example.com", "New mug order ready to print: o1", "body")
            .await
            .unwrap();

        assert_eq!(service.sent_count(), 1);
        assert_eq!(service.count_mentioning("o1"), 1);
        assert_eq!(service.sent()[0].to, "ops@example.com");
    }

    #[tokio::test]
    async fn test_fail_on_send() {
        let service = InMemoryEmailService::new();
        service.set_fail_on_send(true);

        let result = service.send("ops@example.com", "s", "b").await;
        assert!(matches!(result, Err(FulfillmentError::Dispatch(_))));
        assert_eq!(service.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_log_service_always_succeeds() {
        LogEmailService.send("ops@example.com", "s", "b").await.unwrap();
    }

    #[tokio::test]
    async fn test_http_service_reports_connection_failure() {
        // Port 9 (discard) on localhost is not expected to accept HTTP.
        let service = HttpEmailService::new(
            "http://127.0.0.1:9/emails",
            "key",
            "orders@example.com",
            Duration::from_millis(500),
        )
        .unwrap();

        let result = service.send("ops@example.com", "s", "b").await;
        assert!(matches!(result, Err(FulfillmentError::Dispatch(_))));
    }
}
