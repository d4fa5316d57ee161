use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderMap, HeaderValue, Method},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::checkout::{initiate_checkout, CheckoutProvider, CheckoutRedirect};
use crate::error::Result;
use crate::paypal_handler::{paypal_return_handler, paypal_webhook_handler};
use crate::redemption::{redeem, token_status, TokenStatus};
use crate::state::AppState;
use crate::stripe_handler::stripe_webhook_handler;
use crate::throttle::client_key;

pub fn app(state: Arc<AppState>) -> Router {
    let cors = match HeaderValue::from_str(&state.urls.site_url) {
        Ok(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([axum::http::header::CONTENT_TYPE]),
        Err(_) => {
            tracing::warn!(site_url = %state.urls.site_url, "SITE_URL is not a valid origin, CORS disabled");
            CorsLayer::new()
        }
    };

    let checkout_router = Router::new()
        .route("/stripe", post(stripe_checkout))
        .route("/paypal", post(paypal_checkout))
        .layer(cors);

    let webhook_router = Router::new()
        .route("/stripe", post(stripe_webhook_handler))
        .route("/paypal", post(paypal_webhook_handler));

    Router::new()
        .nest("/api/checkout", checkout_router)
        .nest("/webhooks", webhook_router)
        .route("/checkout/paypal/return", get(paypal_return_handler))
        .route("/download/:token", get(download))
        .route("/api/download/:token", get(download_status))
        .route("/health", get(|| async { "OK" }))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutBody {
    pub book_id: String,
}

async fn stripe_checkout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: std::result::Result<Json<CheckoutBody>, JsonRejection>,
) -> Result<Json<CheckoutRedirect>> {
    let Json(body) = body?;
    start_checkout(&state, &headers, &state.stripe, &body.book_id).await
}

async fn paypal_checkout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: std::result::Result<Json<CheckoutBody>, JsonRejection>,
) -> Result<Json<CheckoutRedirect>> {
    let Json(body) = body?;
    start_checkout(&state, &headers, &state.paypal, &body.book_id).await
}

async fn start_checkout(
    state: &AppState,
    headers: &HeaderMap,
    provider: &dyn CheckoutProvider,
    book_id: &str,
) -> Result<Json<CheckoutRedirect>> {
    state.throttle.check(client_key(headers).as_deref()).await?;
    let redirect = initiate_checkout(&state.store, provider, book_id, &state.urls).await?;
    Ok(Json(redirect))
}

/// `GET /download/:token` - consume one use and redirect to the file.
async fn download(State(state): State<Arc<AppState>>, Path(token): Path<String>) -> Response {
    match redeem(&state.store, &token, &state.files_base_url) {
        Ok(location) => Redirect::to(&location.url).into_response(),
        Err(e) => e.into_response(),
    }
}

/// `GET /api/download/:token` - usage report for the landing page.
async fn download_status(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<Json<TokenStatus>> {
    Ok(Json(token_status(&state.store, &token)?))
}
