// Stripe checkout sessions and webhook handling for direct ebook sales.

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::Response,
};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;

use crate::checkout::{
    provider_http_client, status_error, transport_error, CheckoutProvider, CheckoutRequest,
    ProviderSession,
};
use crate::config::CheckoutUrls;
use crate::error::{AppError, Result};
use crate::fulfillment::{fulfill, webhook_response, CompletedPayment, WebhookOutcome};
use crate::models::FormatType;
use crate::state::AppState;

pub const PROVIDER: &str = "stripe";

// ═══════════════════════════════════════════════════════════════════════════════
// STRIPE CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub api_base: String,
}

impl StripeConfig {
    pub fn from_env() -> Self {
        Self {
            secret_key: std::env::var("STRIPE_SECRET_KEY")
                .unwrap_or_else(|_| "sk_test_placeholder".to_string()),
            webhook_secret: std::env::var("STRIPE_WEBHOOK_SECRET")
                .unwrap_or_else(|_| "whsec_placeholder".to_string()),
            api_base: std::env::var("STRIPE_API_BASE")
                .unwrap_or_else(|_| "https://api.stripe.com".to_string()),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// STRIPE EVENT TYPES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub created: Option<i64>,
    pub data: StripeEventData,
    #[serde(default)]
    pub livemode: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub customer_email: Option<String>,
    pub customer_details: Option<CustomerDetails>,
    pub amount_total: Option<i64>,
    pub currency: Option<String>,
    /// `paid`, `unpaid` or `no_payment_required`.
    pub payment_status: Option<String>,
    pub payment_intent: Option<String>,
    pub metadata: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerDetails {
    pub email: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreateCheckoutSessionResponse {
    id: String,
    url: Option<String>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// STRIPE CLIENT
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct StripeClient {
    pub config: StripeConfig,
    http_client: Client,
}

impl StripeClient {
    pub fn new(config: StripeConfig, timeout: Duration) -> Self {
        Self {
            config,
            http_client: provider_http_client(timeout),
        }
    }
}

#[async_trait]
impl CheckoutProvider for StripeClient {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn success_url(&self, urls: &CheckoutUrls) -> String {
        urls.stripe_success()
    }

    async fn create_checkout(&self, request: &CheckoutRequest) -> Result<ProviderSession> {
        let unit_amount = request.amount_cents.to_string();
        let format_type = request.format_type.as_str();

        let form: [(&str, &str); 13] = [
            ("mode", "payment"),
            ("success_url", request.success_url.as_str()),
            ("cancel_url", request.cancel_url.as_str()),
            ("line_items[0][quantity]", "1"),
            ("line_items[0][price_data][currency]", request.currency.as_str()),
            ("line_items[0][price_data][unit_amount]", unit_amount.as_str()),
            ("line_items[0][price_data][product_data][name]", request.title.as_str()),
            ("metadata[bookId]", request.book_id.as_str()),
            ("metadata[formatType]", format_type),
            ("payment_intent_data[metadata][bookId]", request.book_id.as_str()),
            ("payment_intent_data[metadata][formatType]", format_type),
            ("customer_creation", "if_required"),
            ("billing_address_collection", "auto"),
        ];

        let url = format!(
            "{}/v1/checkout/sessions",
            self.config.api_base.trim_end_matches('/')
        );
        let resp = self
            .http_client
            .post(&url)
            .basic_auth(&self.config.secret_key, None::<&str>)
            .form(&form)
            .send()
            .await
            .map_err(|e| transport_error(PROVIDER, e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(status_error(PROVIDER, status, &body));
        }

        let session: CreateCheckoutSessionResponse = resp.json().await.map_err(|e| {
            AppError::ProviderRequestFailed(format!("unreadable Stripe session response: {}", e))
        })?;

        let redirect_url = session.url.ok_or_else(|| {
            AppError::ProviderRequestFailed(format!("Stripe session {} has no url", session.id))
        })?;

        Ok(ProviderSession {
            id: session.id,
            redirect_url,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// WEBHOOK SIGNATURE VERIFICATION
// ═══════════════════════════════════════════════════════════════════════════════

type HmacSha256 = Hmac<Sha256>;

/// Oldest accepted webhook timestamp, in seconds.
const TIMESTAMP_TOLERANCE_SECS: i64 = 300;
/// How far in the future a timestamp may be (clock skew).
const FUTURE_SKEW_SECS: i64 = 60;

/// Verify a `Stripe-Signature` header (`t=<unix>,v1=<hex>[,v1=<hex>...]`).
pub fn verify_webhook_signature(
    payload: &[u8],
    signature_header: &str,
    webhook_secret: &str,
) -> std::result::Result<(), String> {
    verify_webhook_signature_at(payload, signature_header, webhook_secret, Utc::now().timestamp())
}

pub fn verify_webhook_signature_at(
    payload: &[u8],
    signature_header: &str,
    webhook_secret: &str,
    now: i64,
) -> std::result::Result<(), String> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in signature_header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = Some(value),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or("Missing timestamp")?;
    if signatures.is_empty() {
        return Err("Missing signature".to_string());
    }

    let ts: i64 = timestamp.parse().map_err(|_| "Invalid timestamp")?;
    // The header is attacker-controlled; extreme values must not overflow.
    let age = now.checked_sub(ts).ok_or("Invalid timestamp")?;
    if age > TIMESTAMP_TOLERANCE_SECS {
        return Err(format!("Webhook timestamp too old ({}s)", age));
    }
    if age < -FUTURE_SKEW_SECS {
        return Err(format!("Webhook timestamp in the future ({}s)", age.unsigned_abs()));
    }

    let mut mac =
        HmacSha256::new_from_slice(webhook_secret.as_bytes()).map_err(|_| "Invalid webhook secret")?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    let computed_sig = hex::encode(mac.finalize().into_bytes());
    let computed = computed_sig.as_bytes();

    // Signature length is not secret; only the content comparison must be
    // constant-time.
    let matched = signatures
        .iter()
        .any(|sig| sig.len() == computed.len() && bool::from(computed.ct_eq(sig.as_bytes())));

    if matched {
        Ok(())
    } else {
        Err("Invalid webhook signature".to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EVENT PARSING
// ═══════════════════════════════════════════════════════════════════════════════

/// Extract the completed payment from an event. `Ok(None)` means the event
/// type does not trigger fulfillment.
pub fn completed_payment_from_event(event: &StripeEvent) -> Result<Option<CompletedPayment>> {
    let is_completion = matches!(
        event.event_type.as_str(),
        "checkout.session.completed" | "checkout.session.async_payment_succeeded"
    );
    if !is_completion {
        return Ok(None);
    }

    let session: CheckoutSession = serde_json::from_value(event.data.object.clone())
        .map_err(|e| AppError::MalformedWebhookEvent(format!("unreadable checkout session: {}", e)))?;

    // Delayed payment methods complete the session before the money moves;
    // the async_payment_succeeded event follows once it does.
    if session.payment_status.as_deref() == Some("unpaid") {
        tracing::info!(session_id = %session.id, "Checkout completed but unpaid, awaiting async payment");
        return Ok(None);
    }

    let metadata = session.metadata.unwrap_or_default();
    let book_id = metadata
        .get("bookId")
        .or_else(|| metadata.get("book_id"))
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            AppError::MalformedWebhookEvent(format!("session {} has no bookId metadata", session.id))
        })?
        .to_string();

    let format_type = match metadata.get("formatType") {
        Some(raw) => raw
            .parse::<FormatType>()
            .map_err(AppError::MalformedWebhookEvent)?,
        None => FormatType::Ebook,
    };

    let details = session.customer_details.as_ref();
    let customer_email = session
        .customer_email
        .clone()
        .or_else(|| details.and_then(|d| d.email.clone()))
        .filter(|e| !e.trim().is_empty())
        .ok_or_else(|| {
            AppError::MalformedWebhookEvent(format!("session {} has no customer email", session.id))
        })?;
    let customer_name = details.and_then(|d| d.name.clone());

    let amount_cents = session.amount_total.ok_or_else(|| {
        AppError::MalformedWebhookEvent(format!("session {} has no amount_total", session.id))
    })?;
    let currency = session
        .currency
        .ok_or_else(|| {
            AppError::MalformedWebhookEvent(format!("session {} has no currency", session.id))
        })?
        .to_lowercase();

    Ok(Some(CompletedPayment {
        provider: PROVIDER,
        transaction_id: session.id,
        book_id,
        format_type,
        customer_email,
        customer_name,
        amount_cents,
        currency,
    }))
}

// ═══════════════════════════════════════════════════════════════════════════════
// WEBHOOK HANDLER
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn stripe_webhook_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let result = process_webhook(&state, &headers, &body);
    webhook_response(PROVIDER, result)
}

fn process_webhook(state: &AppState, headers: &HeaderMap, body: &[u8]) -> Result<WebhookOutcome> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::InvalidSignature("missing Stripe-Signature header".into()))?;

    verify_webhook_signature(body, signature, &state.stripe.config.webhook_secret)
        .map_err(AppError::InvalidSignature)?;

    let event: StripeEvent = serde_json::from_slice(body)
        .map_err(|e| AppError::MalformedWebhookEvent(format!("unreadable Stripe event: {}", e)))?;

    tracing::info!(event_id = %event.id, event_type = %event.event_type, "Stripe webhook received");

    match completed_payment_from_event(&event)? {
        Some(payment) => fulfill(&state.store, &payment),
        None => {
            tracing::debug!(event_type = %event.event_type, "Stripe event ignored");
            Ok(WebhookOutcome::Ignored)
        }
    }
}
