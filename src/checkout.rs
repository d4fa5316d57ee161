//! Checkout initiation: validate that a book can be sold and delivered, then
//! open a hosted checkout with a payment provider.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::config::CheckoutUrls;
use crate::db::BookRepository;
use crate::error::{AppError, Result};
use crate::models::FormatType;

/// What the provider needs to open a hosted checkout for one book.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub book_id: String,
    pub title: String,
    pub format_type: FormatType,
    pub amount_cents: i64,
    pub currency: String,
    pub success_url: String,
    pub cancel_url: String,
}

/// A provider-hosted session. Only the id leaves the provider; nothing is
/// persisted locally.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSession {
    pub id: String,
    pub redirect_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutRedirect {
    pub url: String,
}

/// Metadata echoed back by the provider on completion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutMetadata {
    pub book_id: String,
    pub format_type: FormatType,
}

#[async_trait]
pub trait CheckoutProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Success URL the shopper lands on after paying with this provider.
    fn success_url(&self, urls: &CheckoutUrls) -> String;

    async fn create_checkout(&self, request: &CheckoutRequest) -> Result<ProviderSession>;
}

/// Validate the book and create a hosted checkout.
///
/// Fails with `BookNotFound`, `NotEligibleForSale` (direct sale disabled or no
/// positive price) or `FulfillmentUnavailable` (no file to deliver) before any
/// provider call is made.
pub async fn initiate_checkout<B>(
    books: &B,
    provider: &dyn CheckoutProvider,
    book_id: &str,
    urls: &CheckoutUrls,
) -> Result<CheckoutRedirect>
where
    B: BookRepository + Sync + ?Sized,
{
    let book = books.get_book(book_id)?.ok_or(AppError::BookNotFound)?;

    let amount_cents = book.sale_price().ok_or(AppError::NotEligibleForSale)?;

    if !book.has_file() {
        tracing::warn!(book_id = %book.id, "Checkout refused: book has no ebook file configured");
        return Err(AppError::FulfillmentUnavailable);
    }

    let request = CheckoutRequest {
        book_id: book.id.clone(),
        title: book.title.clone(),
        format_type: FormatType::Ebook,
        amount_cents,
        currency: book.currency.to_lowercase(),
        success_url: provider.success_url(urls),
        cancel_url: urls.cancel(&book.id),
    };

    let session = provider.create_checkout(&request).await?;

    tracing::info!(
        provider = provider.name(),
        book_id = %book.id,
        session_id = %session.id,
        "Checkout session created"
    );

    Ok(CheckoutRedirect {
        url: session.redirect_url,
    })
}

/// HTTP client for provider APIs. Every call is bounded by `timeout`.
pub fn provider_http_client(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!("Failed to build provider HTTP client ({}), using defaults", e);
            Client::new()
        })
}

pub(crate) fn transport_error(provider: &str, e: reqwest::Error) -> AppError {
    if e.is_timeout() {
        AppError::ProviderRequestFailed(format!("{} request timed out", provider))
    } else {
        AppError::ProviderRequestFailed(format!("{} request failed: {}", provider, e))
    }
}

/// Map a non-success provider response to the checkout error taxonomy.
pub(crate) fn status_error(provider: &str, status: StatusCode, body: &str) -> AppError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            tracing::error!(provider, %status, "Provider rejected credentials");
            AppError::ProviderAuthenticationFailed
        }
        _ => AppError::ProviderRequestFailed(format!("{} returned {}: {}", provider, status, body)),
    }
}

/// Render minor units as a decimal string, e.g. `999` -> `"9.99"`.
pub fn format_minor_units(amount_cents: i64) -> String {
    let sign = if amount_cents < 0 { "-" } else { "" };
    let abs = amount_cents.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

/// Parse a provider decimal amount (`"9.99"`, `"10"`, `"10.5"`) into minor
/// units without going through floating point.
pub fn parse_minor_units(value: &str) -> Option<i64> {
    let value = value.trim();
    let (whole, frac) = match value.split_once('.') {
        Some((w, f)) => (w, f),
        None => (value, ""),
    };
    if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if frac.len() > 2 || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let whole: i64 = whole.parse().ok()?;
    let frac_cents: i64 = match frac.len() {
        0 => 0,
        1 => frac.parse::<i64>().ok()? * 10,
        _ => frac.parse().ok()?,
    };
    whole.checked_mul(100)?.checked_add(frac_cents)
}
