//! Download token redemption.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::{BookRepository, DownloadTokenRepository, OrderRepository};
use crate::error::{AppError, Result};
use crate::models::{DownloadToken, OrderStatus};
use crate::tokens::token_prefix;

/// Where the caller should send the customer for the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLocation {
    pub url: String,
}

impl FileLocation {
    /// Absolute URLs are used as-is; anything else (bucket keys, paths) is
    /// served from under `files_base_url`.
    pub fn resolve(file_ref: &str, files_base_url: &str) -> Self {
        let file_ref = file_ref.trim();
        if file_ref.starts_with("https://") || file_ref.starts_with("http://") {
            return Self {
                url: file_ref.to_string(),
            };
        }
        let key = file_ref
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(file_ref)
            .trim_start_matches('/');
        Self {
            url: format!("{}/{}", files_base_url.trim_end_matches('/'), key),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenStatus {
    pub download_count: i64,
    pub max_downloads: i64,
    pub remaining_downloads: i64,
    pub expires_at: DateTime<Utc>,
    pub expired: bool,
}

pub fn redeem<S>(store: &S, token: &str, files_base_url: &str) -> Result<FileLocation>
where
    S: BookRepository + OrderRepository + DownloadTokenRepository + ?Sized,
{
    redeem_at(store, token, files_base_url, Utc::now())
}

/// Validate a token and consume one download.
///
/// Checks run in a fixed order and each failure is terminal: unknown token,
/// expired, order not completed, book has no file, use cap reached. The cap
/// check and the increment are one conditional update in the store, so two
/// requests racing for the last use cannot both succeed.
pub fn redeem_at<S>(
    store: &S,
    token: &str,
    files_base_url: &str,
    now: DateTime<Utc>,
) -> Result<FileLocation>
where
    S: BookRepository + OrderRepository + DownloadTokenRepository + ?Sized,
{
    let record = store.get_token(token)?.ok_or(AppError::InvalidToken)?;

    if record.is_expired_at(now) {
        return Err(AppError::TokenExpired);
    }

    let order = store
        .get_order(&record.order_id)?
        .ok_or(AppError::PaymentNotCompleted)?;
    if order.status != OrderStatus::Completed {
        return Err(AppError::PaymentNotCompleted);
    }

    let file_ref = store
        .get_book(&record.book_id)?
        .and_then(|book| book.ebook_file_ref)
        .filter(|f| !f.trim().is_empty())
        .ok_or(AppError::FileUnavailable)?;

    if !store.try_consume(&record.token, now)? {
        // The update also refuses expired tokens; report whichever applies.
        if record.is_expired_at(now) {
            return Err(AppError::TokenExpired);
        }
        tracing::info!(token = token_prefix(&record.token), "Download limit reached");
        return Err(AppError::DownloadLimitReached);
    }

    tracing::info!(
        token = token_prefix(&record.token),
        order_id = %record.order_id,
        "Download redeemed"
    );

    Ok(FileLocation::resolve(&file_ref, files_base_url))
}

/// Report a token's usage without consuming a download.
pub fn token_status<S>(store: &S, token: &str) -> Result<TokenStatus>
where
    S: DownloadTokenRepository + ?Sized,
{
    let record = store.get_token(token)?.ok_or(AppError::InvalidToken)?;
    Ok(status_of(&record, Utc::now()))
}

fn status_of(record: &DownloadToken, now: DateTime<Utc>) -> TokenStatus {
    TokenStatus {
        download_count: record.download_count,
        max_downloads: record.max_downloads,
        remaining_downloads: record.remaining(),
        expires_at: record.expires_at,
        expired: record.is_expired_at(now),
    }
}
