use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A catalog entry. Only the fields the fulfillment pipeline reads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Book {
    pub id: String,
    pub title: String,
    /// Ebook unit price in minor units (cents).
    pub price_cents: Option<i64>,
    pub currency: String,
    /// Reference to the protected ebook file (URL, bucket key or path).
    pub ebook_file_ref: Option<String>,
    pub direct_sale_allowed: bool,
    pub cover_ref: Option<String>,
}

impl Book {
    pub fn has_file(&self) -> bool {
        self.ebook_file_ref
            .as_deref()
            .is_some_and(|f| !f.trim().is_empty())
    }

    /// Price when the book may be sold directly, `None` otherwise.
    pub fn sale_price(&self) -> Option<i64> {
        if !self.direct_sale_allowed {
            return None;
        }
        self.price_cents.filter(|p| *p > 0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FormatType {
    Ebook,
}

impl FormatType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormatType::Ebook => "ebook",
        }
    }
}

impl fmt::Display for FormatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FormatType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ebook" => Ok(FormatType::Ebook),
            other => Err(format!("unknown format type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Completed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Completed => "completed",
        }
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "completed" => Ok(OrderStatus::Completed),
            other => Err(format!("unknown order status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Order {
    pub id: String,
    pub customer_email: String,
    pub customer_name: Option<String>,
    /// Stripe checkout session id or PayPal sale/capture id. Unique.
    pub transaction_id: String,
    pub provider: String,
    pub book_id: String,
    pub format_type: FormatType,
    pub amount_cents: i64,
    pub currency: String,
    pub status: OrderStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// Amount in major units, e.g. `9.99`.
    pub fn amount(&self) -> f64 {
        self.amount_cents as f64 / 100.0
    }
}

/// Insert payload for an order. The id and timestamps are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub customer_email: String,
    pub customer_name: Option<String>,
    pub transaction_id: String,
    pub provider: String,
    pub book_id: String,
    pub format_type: FormatType,
    pub amount_cents: i64,
    pub currency: String,
    pub status: OrderStatus,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DownloadToken {
    pub token: String,
    pub order_id: String,
    pub book_id: String,
    pub max_downloads: i64,
    pub download_count: i64,
    pub expires_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl DownloadToken {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn remaining(&self) -> i64 {
        (self.max_downloads - self.download_count).max(0)
    }
}
