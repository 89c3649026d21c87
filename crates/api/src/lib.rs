//! HTTP API for the mug print fulfillment pipeline.
//!
//! Receives payment webhooks and artwork uploads, exposes operator endpoints
//! for inspection, regeneration and notification resends, and serves signed
//! artifact downloads. Structured logging via tracing, Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post, put};
use metrics_exporter_prometheus::PrometheusHandle;
use order_store::OrderStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::Config;
pub use state::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: OrderStore + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    // One byte over the ceiling so oversized bodies reach the intake check.
    let upload_limit = state.intake.max_bytes().saturating_add(1);

    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/webhooks/payments", post(routes::webhooks::receive::<S>))
        .route(
            "/orders",
            get(routes::orders::list_unfulfilled::<S>).post(routes::orders::create::<S>),
        )
        .route("/orders/{id}", get(routes::orders::get::<S>))
        .route(
            "/orders/{id}/artwork",
            put(routes::orders::upload_artwork::<S>).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route(
            "/orders/{id}/resend-notification",
            post(routes::orders::resend_notification::<S>),
        )
        .route("/orders/{id}/regenerate", post(routes::orders::regenerate::<S>))
        .route("/files/{bucket}/{*path}", get(routes::files::download::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
