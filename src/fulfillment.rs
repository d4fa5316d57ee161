//! Provider-agnostic webhook dispatch: a confirmed payment becomes an order
//! and, when the book has a file, a download token.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::db::{BookRepository, DownloadTokenRepository, OrderRepository};
use crate::error::{AppError, Result};
use crate::models::FormatType;
use crate::orders::{record_order, RecordOrder};
use crate::tokens::issue_token;

/// A completed payment as parsed from either provider's webhook.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedPayment {
    pub provider: &'static str,
    pub transaction_id: String,
    pub book_id: String,
    pub format_type: FormatType,
    pub customer_email: String,
    pub customer_name: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WebhookOutcome {
    /// Authentic event of a type that does not trigger fulfillment.
    Ignored,
    Fulfilled {
        order_id: String,
        token_issued: bool,
        duplicate: bool,
    },
}

pub fn fulfill<S>(store: &S, payment: &CompletedPayment) -> Result<WebhookOutcome>
where
    S: BookRepository + OrderRepository + DownloadTokenRepository + ?Sized,
{
    let recorded = record_order(
        store,
        RecordOrder {
            provider: payment.provider.to_string(),
            transaction_id: payment.transaction_id.clone(),
            book_id: payment.book_id.clone(),
            format_type: payment.format_type,
            customer_email: payment.customer_email.clone(),
            customer_name: payment.customer_name.clone(),
            amount_cents: payment.amount_cents,
            currency: payment.currency.clone(),
        },
    )?;
    let order = recorded.order;

    // Runs on redeliveries too: a previous attempt may have recorded the
    // order and then failed before the token was stored.
    let has_file = store
        .get_book(&order.book_id)?
        .is_some_and(|book| book.has_file());

    let token_issued = if has_file {
        let issued = issue_token(store, &order.id, &order.book_id)?;
        if issued.newly_issued && !recorded.newly_recorded {
            tracing::warn!(
                order_id = %order.id,
                "Issued missing download token for previously recorded order"
            );
        }
        true
    } else {
        tracing::warn!(
            order_id = %order.id,
            book_id = %order.book_id,
            "Book has no ebook file, no download token issued"
        );
        false
    };

    Ok(WebhookOutcome::Fulfilled {
        order_id: order.id,
        token_issued,
        duplicate: !recorded.newly_recorded,
    })
}

/// Turn a webhook processing result into the response the provider sees.
///
/// Malformed events and unknown books are acknowledged because redelivering
/// them can never succeed. Persistence failures return 500 so the provider
/// retries the whole event.
pub fn webhook_response(provider: &'static str, result: Result<WebhookOutcome>) -> Response {
    match result {
        Ok(outcome) => {
            tracing::debug!(provider, ?outcome, "Webhook processed");
            (StatusCode::OK, Json(outcome)).into_response()
        }
        Err(AppError::BookNotFound) => {
            tracing::error!(provider, "Paid webhook references an unknown book, not fulfilled");
            AppError::MalformedWebhookEvent("unknown book".into()).into_response()
        }
        Err(e) => e.into_response(),
    }
}
