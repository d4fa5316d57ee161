//! Download token issuance.

use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::db::DownloadTokenRepository;
use crate::error::Result;
use crate::models::DownloadToken;

pub const MAX_DOWNLOADS: i64 = 5;
pub const TOKEN_TTL_DAYS: i64 = 30;

/// Bytes of OS randomness per token (rendered as 64 hex chars).
const TOKEN_BYTES: usize = 32;

pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Short, non-secret form of a token for log lines.
pub fn token_prefix(token: &str) -> &str {
    token.get(..8).unwrap_or(token)
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: DownloadToken,
    /// `false` when the order already had a token and it was returned as-is.
    pub newly_issued: bool,
}

pub fn issue_token<S>(store: &S, order_id: &str, book_id: &str) -> Result<IssuedToken>
where
    S: DownloadTokenRepository + ?Sized,
{
    issue_token_at(store, order_id, book_id, Utc::now())
}

/// Issue the download token for an order. Calling this again for the same
/// order returns the existing token instead of minting a second one, so a
/// retried webhook can finish a fulfillment that failed after the order was
/// recorded.
pub fn issue_token_at<S>(
    store: &S,
    order_id: &str,
    book_id: &str,
    now: DateTime<Utc>,
) -> Result<IssuedToken>
where
    S: DownloadTokenRepository + ?Sized,
{
    if let Some(existing) = store.get_token_for_order(order_id)? {
        return Ok(IssuedToken {
            token: existing,
            newly_issued: false,
        });
    }

    let candidate = DownloadToken {
        token: generate_token(),
        order_id: order_id.to_string(),
        book_id: book_id.to_string(),
        max_downloads: MAX_DOWNLOADS,
        download_count: 0,
        expires_at: now + Duration::days(TOKEN_TTL_DAYS),
        last_used_at: None,
        created_at: now,
    };

    let (token, inserted) = store.insert_token_if_absent(&candidate)?;

    if inserted {
        tracing::info!(
            order_id,
            token = token_prefix(&token.token),
            expires_at = %token.expires_at,
            "Download token issued"
        );
    }

    Ok(IssuedToken {
        token,
        newly_issued: inserted,
    })
}
