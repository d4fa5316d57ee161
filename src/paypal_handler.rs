// PayPal orders, capture on return, and verified webhook handling.

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::HeaderMap,
    response::{IntoResponse, Redirect, Response},
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use serde_json::value::RawValue;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::checkout::{
    format_minor_units, parse_minor_units, provider_http_client, status_error, transport_error,
    CheckoutMetadata, CheckoutProvider, CheckoutRequest, ProviderSession,
};
use crate::config::CheckoutUrls;
use crate::error::{AppError, Result};
use crate::fulfillment::{fulfill, webhook_response, CompletedPayment, WebhookOutcome};
use crate::models::FormatType;
use crate::state::AppState;

pub const PROVIDER: &str = "paypal";

// ═══════════════════════════════════════════════════════════════════════════════
// PAYPAL CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct PayPalConfig {
    pub client_id: String,
    pub client_secret: String,
    pub mode: String, // "sandbox" or "live"
    pub webhook_id: String,
    /// Overrides the mode-derived API host.
    pub api_base: Option<String>,
}

impl PayPalConfig {
    pub fn from_env() -> Self {
        Self {
            client_id: std::env::var("PAYPAL_CLIENT_ID")
                .unwrap_or_else(|_| "sb_client_id_placeholder".to_string()),
            client_secret: std::env::var("PAYPAL_CLIENT_SECRET")
                .unwrap_or_else(|_| "sb_client_secret_placeholder".to_string()),
            mode: std::env::var("PAYPAL_MODE").unwrap_or_else(|_| "sandbox".to_string()),
            webhook_id: std::env::var("PAYPAL_WEBHOOK_ID")
                .unwrap_or_else(|_| "wh_id_placeholder".to_string()),
            api_base: std::env::var("PAYPAL_API_BASE").ok().filter(|s| !s.is_empty()),
        }
    }

    pub fn base_url(&self) -> &str {
        if let Some(base) = &self.api_base {
            return base.trim_end_matches('/');
        }
        if self.mode == "live" {
            "https://api-m.paypal.com"
        } else {
            "https://api-m.sandbox.paypal.com"
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PAYPAL EVENT TYPES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayPalEvent {
    pub id: String,
    pub event_type: String,
    pub create_time: Option<String>,
    pub resource_type: Option<String>,
    pub resource: serde_json::Value,
    pub summary: Option<String>,
}

/// The parts of a sale (v1) or capture (v2) resource we read.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentResource {
    pub id: String,
    pub custom: Option<String>,
    pub custom_id: Option<String>,
    pub amount: Option<PayPalAmount>,
    pub payer: Option<PayPalPayer>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PayPalAmount {
    #[serde(alias = "value")]
    pub total: Option<String>,
    #[serde(alias = "currency_code")]
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PayPalPayer {
    #[serde(alias = "email_address")]
    pub email: Option<String>,
    /// A plain string, or `{given_name, surname}` in v2 payloads.
    pub name: Option<serde_json::Value>,
    pub payer_info: Option<PayerInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PayerInfo {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl PayPalPayer {
    fn email(&self) -> Option<String> {
        self.email
            .clone()
            .or_else(|| self.payer_info.as_ref().and_then(|i| i.email.clone()))
            .filter(|e| !e.trim().is_empty())
    }

    fn display_name(&self) -> Option<String> {
        let from_parts = |first: Option<&str>, last: Option<&str>| {
            let joined = [first.unwrap_or(""), last.unwrap_or("")].join(" ");
            let joined = joined.trim().to_string();
            (!joined.is_empty()).then_some(joined)
        };

        match &self.name {
            Some(serde_json::Value::String(s)) if !s.trim().is_empty() => {
                return Some(s.trim().to_string())
            }
            Some(serde_json::Value::Object(map)) => {
                if let Some(full) = map.get("full_name").and_then(|v| v.as_str()) {
                    return Some(full.to_string());
                }
                let name = from_parts(
                    map.get("given_name").and_then(|v| v.as_str()),
                    map.get("surname").and_then(|v| v.as_str()),
                );
                if name.is_some() {
                    return name;
                }
            }
            _ => {}
        }

        self.payer_info
            .as_ref()
            .and_then(|i| from_parts(i.first_name.as_deref(), i.last_name.as_deref()))
    }
}

#[derive(Debug, Deserialize)]
struct CreateOrderResponse {
    id: String,
    #[serde(default)]
    links: Vec<PayPalLink>,
}

#[derive(Debug, Deserialize)]
struct PayPalLink {
    href: String,
    rel: String,
}

#[derive(Debug, Deserialize)]
struct CaptureResponse {
    status: Option<String>,
}

#[derive(Debug, Serialize)]
struct VerifySignatureRequest<'a> {
    auth_algo: String,
    cert_url: String,
    transmission_id: String,
    transmission_sig: String,
    transmission_time: String,
    webhook_id: &'a str,
    webhook_event: Box<RawValue>,
}

#[derive(Debug, Deserialize)]
struct VerifySignatureResponse {
    verification_status: String,
}

// ═══════════════════════════════════════════════════════════════════════════════
// PAYPAL CLIENT
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct PayPalClient {
    pub config: PayPalConfig,
    http_client: Client,
    auth_token: Arc<RwLock<Option<(String, DateTime<Utc>)>>>,
}

impl PayPalClient {
    pub fn new(config: PayPalConfig, timeout: Duration) -> Self {
        Self {
            config,
            http_client: provider_http_client(timeout),
            auth_token: Arc::new(RwLock::new(None)),
        }
    }

    /// Get valid access token (cached or refreshed)
    pub async fn get_access_token(&self) -> Result<String> {
        {
            let token_lock = self.auth_token.read().await;
            if let Some((token, expiry)) = &*token_lock {
                if *expiry > Utc::now() {
                    return Ok(token.clone());
                }
            }
        }

        let auth_str = format!("{}:{}", self.config.client_id, self.config.client_secret);
        let auth_basic = BASE64.encode(auth_str);

        let url = format!("{}/v1/oauth2/token", self.config.base_url());
        let params = [("grant_type", "client_credentials")];

        let resp = self
            .http_client
            .post(&url)
            .header("Authorization", format!("Basic {}", auth_basic))
            .form(&params)
            .send()
            .await
            .map_err(|e| transport_error(PROVIDER, e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    AppError::ProviderAuthenticationFailed
                }
                _ => status_error(PROVIDER, status, &body),
            });
        }

        let body: serde_json::Value = resp.json().await.map_err(|e| {
            AppError::ProviderRequestFailed(format!("unreadable PayPal token response: {}", e))
        })?;
        let access_token = body["access_token"]
            .as_str()
            .ok_or_else(|| AppError::ProviderRequestFailed("no access_token field".into()))?
            .to_string();
        let expires_in = body["expires_in"].as_i64().unwrap_or(3600);

        let mut token_lock = self.auth_token.write().await;
        *token_lock = Some((
            access_token.clone(),
            Utc::now() + chrono::Duration::seconds(expires_in - 60),
        ));

        Ok(access_token)
    }

    /// Capture an approved order. Already-captured orders count as success.
    pub async fn capture_order(&self, order_id: &str) -> Result<String> {
        if order_id.is_empty() || !order_id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(AppError::ProviderRequestFailed(format!(
                "refusing to capture malformed order id {:?}",
                order_id
            )));
        }

        let token = self.get_access_token().await?;
        let url = format!(
            "{}/v2/checkout/orders/{}/capture",
            self.config.base_url(),
            order_id
        );

        let resp = self
            .http_client
            .post(&url)
            .bearer_auth(token)
            .json(&json!({}))
            .send()
            .await
            .map_err(|e| transport_error(PROVIDER, e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            if status == StatusCode::UNPROCESSABLE_ENTITY && body.contains("ORDER_ALREADY_CAPTURED") {
                return Ok("COMPLETED".to_string());
            }
            return Err(status_error(PROVIDER, status, &body));
        }

        let capture: CaptureResponse = resp.json().await.map_err(|e| {
            AppError::ProviderRequestFailed(format!("unreadable PayPal capture response: {}", e))
        })?;
        Ok(capture.status.unwrap_or_else(|| "UNKNOWN".to_string()))
    }

    /// Verify a webhook delivery with PayPal's verify-webhook-signature API.
    /// Fails closed: missing headers, transport errors and any status other
    /// than `SUCCESS` are all `InvalidSignature`.
    pub async fn verify_webhook_signature(&self, headers: &HeaderMap, body: &[u8]) -> Result<()> {
        let header = |name: &'static str| -> Result<String> {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
                .map(String::from)
                .ok_or_else(|| AppError::InvalidSignature(format!("missing {} header", name)))
        };

        // PayPal checks the signature against the event exactly as delivered,
        // so the body is forwarded byte for byte rather than re-serialized.
        let raw_event = String::from_utf8(body.to_vec())
            .map_err(|_| AppError::InvalidSignature("body is not UTF-8".into()))
            .and_then(|raw| {
                RawValue::from_string(raw)
                    .map_err(|e| AppError::InvalidSignature(format!("body is not JSON: {}", e)))
            })?;

        let request = VerifySignatureRequest {
            auth_algo: header("paypal-auth-algo")?,
            cert_url: header("paypal-cert-url")?,
            transmission_id: header("paypal-transmission-id")?,
            transmission_sig: header("paypal-transmission-sig")?,
            transmission_time: header("paypal-transmission-time")?,
            webhook_id: &self.config.webhook_id,
            webhook_event: raw_event,
        };

        let token = self
            .get_access_token()
            .await
            .map_err(|e| AppError::InvalidSignature(format!("could not authenticate: {}", e)))?;

        let url = format!(
            "{}/v1/notifications/verify-webhook-signature",
            self.config.base_url()
        );
        let resp = self
            .http_client
            .post(&url)
            .bearer_auth(token)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::InvalidSignature(format!("verification request failed: {}", e)))?;

        if !resp.status().is_success() {
            return Err(AppError::InvalidSignature(format!(
                "verification endpoint returned {}",
                resp.status()
            )));
        }

        let verdict: VerifySignatureResponse = resp.json().await.map_err(|e| {
            AppError::InvalidSignature(format!("unreadable verification response: {}", e))
        })?;

        if verdict.verification_status == "SUCCESS" {
            Ok(())
        } else {
            Err(AppError::InvalidSignature(format!(
                "verification_status {}",
                verdict.verification_status
            )))
        }
    }
}

#[async_trait]
impl CheckoutProvider for PayPalClient {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn success_url(&self, urls: &CheckoutUrls) -> String {
        urls.paypal_return()
    }

    async fn create_checkout(&self, request: &CheckoutRequest) -> Result<ProviderSession> {
        let token = self.get_access_token().await?;

        let custom_id = serde_json::to_string(&CheckoutMetadata {
            book_id: request.book_id.clone(),
            format_type: request.format_type,
        })
        .map_err(|e| AppError::ProviderRequestFailed(format!("metadata encoding: {}", e)))?;

        let description: String = request.title.chars().take(127).collect();
        let body = json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "reference_id": request.book_id,
                "description": description,
                "custom_id": custom_id,
                "amount": {
                    "currency_code": request.currency.to_uppercase(),
                    "value": format_minor_units(request.amount_cents),
                },
            }],
            "application_context": {
                "return_url": request.success_url,
                "cancel_url": request.cancel_url,
                "user_action": "PAY_NOW",
                "shipping_preference": "NO_SHIPPING",
            },
        });

        let url = format!("{}/v2/checkout/orders", self.config.base_url());
        let resp = self
            .http_client
            .post(&url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(PROVIDER, e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(status_error(PROVIDER, status, &body));
        }

        let order: CreateOrderResponse = resp.json().await.map_err(|e| {
            AppError::ProviderRequestFailed(format!("unreadable PayPal order response: {}", e))
        })?;

        let approval = order
            .links
            .into_iter()
            .find(|l| l.rel == "approve" || l.rel == "payer-action")
            .ok_or_else(|| {
                AppError::ProviderRequestFailed(format!("PayPal order {} has no approval link", order.id))
            })?;

        Ok(ProviderSession {
            id: order.id,
            redirect_url: approval.href,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EVENT PARSING
// ═══════════════════════════════════════════════════════════════════════════════

/// Read checkout metadata from `custom` / `custom_id`: JSON written at order
/// creation, or a bare book id.
pub fn parse_custom(raw: &str) -> Option<CheckoutMetadata> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if raw.starts_with('{') {
        return serde_json::from_str(raw).ok();
    }
    Some(CheckoutMetadata {
        book_id: raw.to_string(),
        format_type: FormatType::Ebook,
    })
}

pub fn completed_payment_from_event(event: &PayPalEvent) -> Result<Option<CompletedPayment>> {
    let is_completion = matches!(
        event.event_type.as_str(),
        "PAYMENT.SALE.COMPLETED" | "PAYMENT.CAPTURE.COMPLETED"
    );
    if !is_completion {
        return Ok(None);
    }

    let resource: PaymentResource = serde_json::from_value(event.resource.clone())
        .map_err(|e| AppError::MalformedWebhookEvent(format!("unreadable PayPal resource: {}", e)))?;

    let metadata = resource
        .custom
        .as_deref()
        .or(resource.custom_id.as_deref())
        .and_then(parse_custom)
        .ok_or_else(|| {
            AppError::MalformedWebhookEvent(format!("payment {} has no book metadata", resource.id))
        })?;

    let payer = resource.payer.as_ref();
    let customer_email = payer.and_then(|p| p.email()).ok_or_else(|| {
        AppError::MalformedWebhookEvent(format!("payment {} has no payer email", resource.id))
    })?;
    let customer_name = payer.and_then(|p| p.display_name());

    let amount = resource.amount.as_ref();
    let amount_cents = amount
        .and_then(|a| a.total.as_deref())
        .and_then(parse_minor_units)
        .ok_or_else(|| {
            AppError::MalformedWebhookEvent(format!("payment {} has no readable amount", resource.id))
        })?;
    let currency = amount
        .and_then(|a| a.currency.as_deref())
        .map(str::to_lowercase)
        .ok_or_else(|| {
            AppError::MalformedWebhookEvent(format!("payment {} has no currency", resource.id))
        })?;

    Ok(Some(CompletedPayment {
        provider: PROVIDER,
        transaction_id: resource.id,
        book_id: metadata.book_id,
        format_type: metadata.format_type,
        customer_email,
        customer_name,
        amount_cents,
        currency,
    }))
}

// ═══════════════════════════════════════════════════════════════════════════════
// WEBHOOK HANDLER
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn paypal_webhook_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let result = process_webhook(&state, &headers, &body).await;
    webhook_response(PROVIDER, result)
}

async fn process_webhook(
    state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<WebhookOutcome> {
    state.paypal.verify_webhook_signature(headers, body).await?;

    let event: PayPalEvent = serde_json::from_slice(body)
        .map_err(|e| AppError::MalformedWebhookEvent(format!("unreadable PayPal event: {}", e)))?;

    tracing::info!(event_id = %event.id, event_type = %event.event_type, "PayPal webhook received");

    match completed_payment_from_event(&event)? {
        Some(payment) => fulfill(&state.store, &payment),
        None => {
            tracing::debug!(event_type = %event.event_type, "PayPal event ignored");
            Ok(WebhookOutcome::Ignored)
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RETURN FROM APPROVAL
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
pub struct ReturnQuery {
    /// PayPal puts the order id in `token`.
    pub token: String,
}

/// Capture the approved order and send the shopper to the storefront.
/// Fulfillment itself waits for the capture webhook.
pub async fn paypal_return_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ReturnQuery>,
) -> Response {
    match state.paypal.capture_order(&query.token).await {
        Ok(status) => {
            tracing::info!(order_id = %query.token, %status, "PayPal order captured");
            Redirect::to(&state.urls.paypal_success()).into_response()
        }
        Err(e) => {
            tracing::error!(order_id = %query.token, "PayPal capture failed: {}", e);
            Redirect::to(&state.urls.checkout_error()).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(event_type: &str, resource: serde_json::Value) -> PayPalEvent {
        serde_json::from_value(json!({
            "id": "WH-1",
            "event_type": event_type,
            "resource": resource,
        }))
        .unwrap()
    }

    #[test]
    fn parses_v1_sale_completed() {
        let ev = event(
            "PAYMENT.SALE.COMPLETED",
            json!({
                "id": "SALE123",
                "custom": r#"{"bookId":"7","formatType":"ebook"}"#,
                "amount": { "total": "12.50", "currency": "USD" },
                "payer": { "payer_info": { "email": "reader@example.com", "first_name": "Grace", "last_name": "Hopper" } }
            }),
        );
        let payment = completed_payment_from_event(&ev).unwrap().unwrap();
        assert_eq!(payment.transaction_id, "SALE123");
        assert_eq!(payment.book_id, "7");
        assert_eq!(payment.amount_cents, 1250);
        assert_eq!(payment.currency, "usd");
        assert_eq!(payment.customer_email, "reader@example.com");
        assert_eq!(payment.customer_name.as_deref(), Some("Grace Hopper"));
    }

    #[test]
    fn parses_v2_capture_completed() {
        let ev = event(
            "PAYMENT.CAPTURE.COMPLETED",
            json!({
                "id": "CAP9",
                "custom_id": "3",
                "amount": { "value": "9.99", "currency_code": "EUR" },
                "payer": { "email_address": "x@example.com", "name": { "given_name": "Ada", "surname": "L" } }
            }),
        );
        let payment = completed_payment_from_event(&ev).unwrap().unwrap();
        assert_eq!(payment.book_id, "3");
        assert_eq!(payment.format_type, FormatType::Ebook);
        assert_eq!(payment.amount_cents, 999);
        assert_eq!(payment.currency, "eur");
        assert_eq!(payment.customer_name.as_deref(), Some("Ada L"));
    }

    #[test]
    fn unrelated_events_are_ignored() {
        let ev = event("BILLING.SUBSCRIPTION.CREATED", json!({ "id": "I-1" }));
        assert!(completed_payment_from_event(&ev).unwrap().is_none());
    }

    #[test]
    fn missing_custom_is_malformed() {
        let ev = event(
            "PAYMENT.SALE.COMPLETED",
            json!({
                "id": "SALE1",
                "amount": { "total": "1.00", "currency": "USD" },
                "payer": { "email": "a@b.c" }
            }),
        );
        assert!(matches!(
            completed_payment_from_event(&ev),
            Err(AppError::MalformedWebhookEvent(_))
        ));
    }

    #[test]
    fn custom_accepts_json_or_bare_id() {
        assert_eq!(parse_custom("42").unwrap().book_id, "42");
        assert_eq!(
            parse_custom(r#"{"bookId":"9","formatType":"ebook"}"#).unwrap().book_id,
            "9"
        );
        assert!(parse_custom("   ").is_none());
        assert!(parse_custom("{not json").is_none());
    }

    #[test]
    fn live_mode_uses_live_host() {
        let mut config = PayPalConfig {
            client_id: "id".into(),
            client_secret: "secret".into(),
            mode: "live".into(),
            webhook_id: "wh".into(),
            api_base: None,
        };
        assert_eq!(config.base_url(), "https://api-m.paypal.com");
        config.mode = "sandbox".into();
        assert_eq!(config.base_url(), "https://api-m.sandbox.paypal.com");
        config.api_base = Some("http://127.0.0.1:9999/".into());
        assert_eq!(config.base_url(), "http://127.0.0.1:9999");
    }
}
