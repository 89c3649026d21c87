//! Shared application state.

use std::sync::Arc;

use axum::http::HeaderMap;
use fulfillment::{
    ArtworkIntake, NotificationDispatcher, ReconciliationEngine, SharedEmailService,
    SharedObjectStorage, UrlSigner, WebhookVerifier, tokens_match,
};
use order_store::OrderStore;

use crate::config::Config;
use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<S: OrderStore> {
    pub engine: Arc<ReconciliationEngine<S>>,
    pub intake: ArtworkIntake<S>,
    pub verifier: WebhookVerifier,
    pub url_signer: UrlSigner,
    pub storage: SharedObjectStorage,
    admin_token: String,
}

impl<S: OrderStore + Clone + 'static> AppState<S> {
    /// Wires the pipeline from configuration and the chosen collaborators.
    pub fn new(
        config: &Config,
        store: S,
        storage: SharedObjectStorage,
        email: SharedEmailService,
    ) -> Self {
        let dispatcher = NotificationDispatcher::new(
            storage.clone(),
            email,
            config.notify_recipient.clone(),
            config.signed_url_ttl(),
        );
        let engine = ReconciliationEngine::new(
            store.clone(),
            storage.clone(),
            dispatcher,
            config.engine_settings(),
        );
        let intake = ArtworkIntake::new(
            store,
            storage.clone(),
            config.upload_token_signer(),
            config.max_upload_bytes,
        );

        Self {
            engine: Arc::new(engine),
            intake,
            verifier: config.webhook_verifier(),
            url_signer: config.url_signer(),
            storage,
            admin_token: config.admin_token.clone(),
        }
    }
}

impl<S: OrderStore> AppState<S> {
    /// Checks the `Authorization: Bearer <token>` header against the admin token.
    pub fn require_admin(&self, headers: &HeaderMap) -> Result<(), ApiError> {
        let provided = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .ok_or(ApiError::Unauthorized("missing_admin_token"))?;

        if tokens_match(&self.admin_token, provided) {
            Ok(())
        } else {
            tracing::warn!("rejected operator request with invalid admin token");
            Err(ApiError::Unauthorized("invalid_admin_token"))
        }
    }
}
