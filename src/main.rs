use std::sync::Arc;
use tokio::signal;
use dotenv::dotenv;
use tracing_subscriber::EnvFilter;

use book_fulfillment_backend::config::Config;
use book_fulfillment_backend::db::SqliteStore;
use book_fulfillment_backend::paypal_handler::{PayPalClient, PayPalConfig};
use book_fulfillment_backend::state::AppState;
use book_fulfillment_backend::stripe_handler::{StripeClient, StripeConfig};
use book_fulfillment_backend::throttle::CheckoutThrottle;

#[tokio::main]
async fn main() {
    // Load environment variables from .env if available
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info")),
        )
        .init();

    let config = Config::from_env();

    let store = SqliteStore::open(&config.database_path).expect("Failed to open database");

    let throttle = CheckoutThrottle::new(config.redis_url.clone(), config.checkout_rate_limit);
    if !throttle.is_enabled() {
        tracing::info!("REDIS_URL not set, checkout throttling disabled");
    }

    let state = Arc::new(AppState {
        store,
        stripe: StripeClient::new(StripeConfig::from_env(), config.provider_timeout),
        paypal: PayPalClient::new(PayPalConfig::from_env(), config.provider_timeout),
        urls: config.checkout_urls(),
        files_base_url: config.files_base_url.clone(),
        throttle,
    });

    let app = book_fulfillment_backend::app(state);

    let addr = config.addr();
    tracing::info!("Server listening on {}", addr);
    tracing::info!("   - Checkout:  POST /api/checkout/{{stripe,paypal}}");
    tracing::info!("   - Webhooks:  POST /webhooks/{{stripe,paypal}}");
    tracing::info!("   - Downloads: GET  /download/:token");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, shutting down gracefully");
}
