use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid request body: {0}")]
    InvalidRequest(String),

    #[error("Book not found")]
    BookNotFound,

    #[error("Book is not eligible for direct sale")]
    NotEligibleForSale,

    #[error("Book has no deliverable file")]
    FulfillmentUnavailable,

    #[error("Payment provider rejected our credentials")]
    ProviderAuthenticationFailed,

    #[error("Payment provider request failed: {0}")]
    ProviderRequestFailed(String),

    #[error("Too many checkout attempts")]
    CheckoutThrottled,

    #[error("Invalid webhook signature: {0}")]
    InvalidSignature(String),

    #[error("Malformed webhook event: {0}")]
    MalformedWebhookEvent(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Invalid download token")]
    InvalidToken,

    #[error("Download token expired")]
    TokenExpired,

    #[error("Payment not completed")]
    PaymentNotCompleted,

    #[error("File unavailable")]
    FileUnavailable,

    #[error("Download limit reached")]
    DownloadLimitReached,
}

impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        AppError::Persistence(e.to_string())
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::InvalidRequest(rejection.body_text())
    }
}

impl From<r2d2::Error> for AppError {
    fn from(e: r2d2::Error) -> Self {
        AppError::Persistence(format!("pool: {}", e))
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: &'static str,
}

impl AppError {
    /// Stable machine-readable code. The download landing page keys its
    /// messages off these, so they must not change.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidRequest(_) => "invalid_request",
            AppError::BookNotFound => "book_not_found",
            AppError::NotEligibleForSale => "not_eligible_for_sale",
            AppError::FulfillmentUnavailable => "fulfillment_unavailable",
            AppError::ProviderAuthenticationFailed | AppError::ProviderRequestFailed(_) => {
                "checkout_failed"
            }
            AppError::CheckoutThrottled => "checkout_throttled",
            AppError::InvalidSignature(_) => "invalid_signature",
            AppError::MalformedWebhookEvent(_) => "malformed_event",
            AppError::Persistence(_) => "persistence_error",
            AppError::InvalidToken => "invalid_token",
            AppError::TokenExpired => "token_expired",
            AppError::PaymentNotCompleted => "payment_not_completed",
            AppError::FileUnavailable => "file_unavailable",
            AppError::DownloadLimitReached => "download_limit_reached",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AppError::BookNotFound => StatusCode::NOT_FOUND,
            AppError::NotEligibleForSale | AppError::FulfillmentUnavailable => {
                StatusCode::BAD_REQUEST
            }
            AppError::ProviderAuthenticationFailed | AppError::ProviderRequestFailed(_) => {
                StatusCode::BAD_GATEWAY
            }
            AppError::CheckoutThrottled => StatusCode::TOO_MANY_REQUESTS,
            AppError::InvalidSignature(_) => StatusCode::UNAUTHORIZED,
            // Acknowledged so the provider stops redelivering it.
            AppError::MalformedWebhookEvent(_) => StatusCode::OK,
            AppError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::InvalidToken => StatusCode::NOT_FOUND,
            AppError::TokenExpired => StatusCode::GONE,
            AppError::PaymentNotCompleted => StatusCode::PAYMENT_REQUIRED,
            AppError::FileUnavailable => StatusCode::NOT_FOUND,
            AppError::DownloadLimitReached => StatusCode::FORBIDDEN,
        }
    }

    fn safe_message(&self) -> &'static str {
        match self {
            AppError::InvalidRequest(_) => "The request could not be read.",
            AppError::BookNotFound => "This book could not be found.",
            AppError::NotEligibleForSale => "This book is not available for direct purchase.",
            AppError::FulfillmentUnavailable => {
                "This book cannot be delivered right now. Please try again later."
            }
            AppError::ProviderAuthenticationFailed | AppError::ProviderRequestFailed(_) => {
                "Something went wrong starting your checkout. Please try again."
            }
            AppError::CheckoutThrottled => "Too many checkout attempts. Please wait a minute.",
            AppError::InvalidSignature(_) => "Invalid signature.",
            AppError::MalformedWebhookEvent(_) => "Event ignored.",
            AppError::Persistence(_) => "Internal server error.",
            AppError::InvalidToken => "This download link is not valid.",
            AppError::TokenExpired => "This download link has expired.",
            AppError::PaymentNotCompleted => "Payment for this order has not completed yet.",
            AppError::FileUnavailable => "The file for this book is currently unavailable.",
            AppError::DownloadLimitReached => {
                "This download link has been used the maximum number of times."
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self {
            AppError::ProviderAuthenticationFailed => {
                tracing::error!("Payment provider authentication failed, check API credentials")
            }
            AppError::ProviderRequestFailed(detail) => {
                tracing::error!("Payment provider request failed: {}", detail)
            }
            AppError::Persistence(detail) => tracing::error!("Persistence error: {}", detail),
            AppError::InvalidRequest(detail) => tracing::debug!("Rejected request body: {}", detail),
            AppError::InvalidSignature(detail) => {
                tracing::warn!("Webhook signature rejected: {}", detail)
            }
            AppError::MalformedWebhookEvent(detail) => {
                tracing::warn!("Malformed webhook event acknowledged: {}", detail)
            }
            _ => {}
        }

        let body = ErrorResponse {
            error: self.code(),
            message: self.safe_message(),
        };

        (self.status(), Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
