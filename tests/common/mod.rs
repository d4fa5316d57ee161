//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Request, Response};
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

pub use book_fulfillment_backend::config::CheckoutUrls;
pub use book_fulfillment_backend::db::{
    BookRepository, DownloadTokenRepository, OrderRepository, SqliteStore,
};
pub use book_fulfillment_backend::error::AppError;
pub use book_fulfillment_backend::models::*;
pub use book_fulfillment_backend::paypal_handler::{PayPalClient, PayPalConfig};
pub use book_fulfillment_backend::state::AppState;
pub use book_fulfillment_backend::stripe_handler::{StripeClient, StripeConfig};
pub use book_fulfillment_backend::throttle::CheckoutThrottle;

pub const STRIPE_WEBHOOK_SECRET: &str = "whsec_test123secret456";
pub const FILES_BASE_URL: &str = "https://files.example.com";

/// A store backed by a SQLite file in a temp dir that lives as long as this.
pub struct TestDb {
    pub store: SqliteStore,
    _dir: TempDir,
}

pub fn setup_test_db() -> TestDb {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("fulfillment.db");
    let store = SqliteStore::open(path.to_str().expect("temp path is not UTF-8"))
        .expect("Failed to open test database");
    TestDb { store, _dir: dir }
}

/// Book 1 from the end-to-end scenarios: sellable, priced at 9.99, with a file.
pub fn sellable_book(id: &str) -> Book {
    Book {
        id: id.to_string(),
        title: format!("Test Book {}", id),
        price_cents: Some(999),
        currency: "usd".to_string(),
        ebook_file_ref: Some(format!("s3://ebooks/book-{}.epub", id)),
        direct_sale_allowed: true,
        cover_ref: None,
    }
}

pub fn create_test_book(store: &SqliteStore, book: Book) -> Book {
    store.upsert_book(&book).expect("Failed to create test book");
    book
}

pub fn test_urls() -> CheckoutUrls {
    CheckoutUrls {
        site_url: "https://author.example.com".to_string(),
        public_base_url: "https://api.author.example.com".to_string(),
    }
}

pub fn stripe_config(api_base: &str) -> StripeConfig {
    StripeConfig {
        secret_key: "sk_test_123".to_string(),
        webhook_secret: STRIPE_WEBHOOK_SECRET.to_string(),
        api_base: api_base.to_string(),
    }
}

pub fn paypal_config(api_base: &str) -> PayPalConfig {
    PayPalConfig {
        client_id: "client".to_string(),
        client_secret: "secret".to_string(),
        mode: "sandbox".to_string(),
        webhook_id: "WH-TEST".to_string(),
        api_base: Some(api_base.to_string()),
    }
}

pub fn test_state_with_timeout(
    store: &SqliteStore,
    stripe_base: &str,
    paypal_base: &str,
    timeout: Duration,
) -> Arc<AppState> {
    Arc::new(AppState {
        store: store.clone(),
        stripe: StripeClient::new(stripe_config(stripe_base), timeout),
        paypal: PayPalClient::new(paypal_config(paypal_base), timeout),
        urls: test_urls(),
        files_base_url: FILES_BASE_URL.to_string(),
        throttle: CheckoutThrottle::disabled(),
    })
}

/// State whose provider clients point at `stripe_base` / `paypal_base`
/// (usually wiremock servers).
pub fn test_state(store: &SqliteStore, stripe_base: &str, paypal_base: &str) -> Arc<AppState> {
    test_state_with_timeout(store, stripe_base, paypal_base, Duration::from_secs(5))
}

/// State for tests that never reach a provider.
pub fn offline_state(store: &SqliteStore) -> Arc<AppState> {
    test_state(store, "http://127.0.0.1:9", "http://127.0.0.1:9")
}

pub fn current_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

pub fn stripe_signature_header(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(format!("{}.", timestamp).as_bytes());
    mac.update(payload);
    format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
}

/// `checkout.session.completed` for book `book_id`, scenario A amounts.
pub fn stripe_completed_event(session_id: &str, book_id: &str) -> Value {
    json!({
        "id": format!("evt_{}", session_id),
        "type": "checkout.session.completed",
        "created": current_timestamp(),
        "livemode": false,
        "data": {
            "object": {
                "id": session_id,
                "customer_email": "buyer@example.com",
                "customer_details": { "email": "buyer@example.com", "name": "Jane Reader" },
                "amount_total": 999,
                "currency": "usd",
                "payment_status": "paid",
                "payment_intent": "pi_test_1",
                "metadata": { "bookId": book_id, "formatType": "ebook" }
            }
        }
    })
}

pub fn signed_stripe_request(payload: &Value) -> Request<Body> {
    let bytes = serde_json::to_vec(payload).unwrap();
    let header = stripe_signature_header(&bytes, STRIPE_WEBHOOK_SECRET, current_timestamp());
    Request::builder()
        .method("POST")
        .uri("/webhooks/stripe")
        .header("content-type", "application/json")
        .header("stripe-signature", header)
        .body(Body::from(bytes))
        .unwrap()
}

pub fn json_post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub async fn send(state: &Arc<AppState>, request: Request<Body>) -> Response<Body> {
    book_fulfillment_backend::app(state.clone())
        .oneshot(request)
        .await
        .unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Record an order and issue its token directly, bypassing the webhook.
pub fn create_fulfilled_order(store: &SqliteStore, book_id: &str, transaction_id: &str) -> (Order, DownloadToken) {
    let (order, _) = store
        .insert_order_if_absent(&NewOrder {
            customer_email: "buyer@example.com".to_string(),
            customer_name: None,
            transaction_id: transaction_id.to_string(),
            provider: "stripe".to_string(),
            book_id: book_id.to_string(),
            format_type: FormatType::Ebook,
            amount_cents: 999,
            currency: "usd".to_string(),
            status: OrderStatus::Completed,
        })
        .expect("Failed to create order");
    let issued = book_fulfillment_backend::tokens::issue_token(store, &order.id, book_id)
        .expect("Failed to issue token");
    (order, issued.token)
}
