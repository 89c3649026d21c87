//! API server entry point.

use std::sync::Arc;
use std::time::Duration;

use api::config::{Config, LogFormat};
use api::{AppState, create_app};
use fulfillment::{
    HttpEmailService, LocalObjectStorage, LogEmailService, SharedEmailService, SharedObjectStorage,
};
use metrics_exporter_prometheus::PrometheusHandle;
use order_store::{InMemoryOrderStore, OrderStore, PostgresOrderStore};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

fn email_service(config: &Config) -> SharedEmailService {
    match &config.email_api_url {
        Some(url) => {
            let service = HttpEmailService::new(
                url.as_str(),
                config.email_api_key.clone().unwrap_or_default(),
                config.email_from.as_str(),
                Duration::from_secs(config.dispatch_timeout_secs),
            )
            .expect("failed to build email HTTP client");
            tracing::info!(%url, "email delivery via HTTP API");
            Arc::new(service)
        }
        None => {
            tracing::warn!("EMAIL_API_URL not set; notifications will only be logged");
            Arc::new(LogEmailService)
        }
    }
}

async fn serve<S: OrderStore + Clone + 'static>(
    config: Config,
    store: S,
    metrics_handle: PrometheusHandle,
) {
    let storage: SharedObjectStorage = Arc::new(LocalObjectStorage::new(
        config.storage_root.clone(),
        config.url_signer(),
    ));
    let state = Arc::new(AppState::new(
        &config,
        store,
        storage,
        email_service(&config),
    ));
    let app = create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, storage_root = %config.storage_root.display(), "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    tracing::info!("server shut down gracefully");
}

#[tokio::main]
async fn main() {
    // 1. Load configuration
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(2);
        }
    };

    // 2. Initialize tracing
    init_tracing(config.log_format);

    // 3. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 4. Pick the order store and serve
    match config.database_url.clone() {
        Some(url) => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(10)
                .connect(&url)
                .await
                .expect("failed to connect to PostgreSQL");
            let store = PostgresOrderStore::new(pool);
            store
                .run_migrations()
                .await
                .expect("failed to run migrations");
            tracing::info!("using PostgreSQL order store");
            serve(config, store, metrics_handle).await;
        }
        None => {
            tracing::warn!("DATABASE_URL not set; orders are kept in memory only");
            serve(config, InMemoryOrderStore::new(), metrics_handle).await;
        }
    }
}
