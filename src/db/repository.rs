//! Repository interfaces, one per entity.
//!
//! The pipeline modules are written against these traits only; `SqliteStore`
//! is the single implementation.

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{Book, DownloadToken, NewOrder, Order};

pub trait BookRepository {
    fn get_book(&self, id: &str) -> Result<Option<Book>>;

    /// Insert or replace a catalog entry.
    fn upsert_book(&self, book: &Book) -> Result<()>;
}

pub trait OrderRepository {
    /// Insert unless an order with the same transaction id exists.
    ///
    /// Returns the stored order and whether this call inserted it. The unique
    /// constraint on `transaction_id` decides the winner under concurrent
    /// duplicate deliveries.
    fn insert_order_if_absent(&self, order: &NewOrder) -> Result<(Order, bool)>;

    fn get_order(&self, id: &str) -> Result<Option<Order>>;

    fn get_order_by_transaction(&self, transaction_id: &str) -> Result<Option<Order>>;

    fn count_orders_by_transaction(&self, transaction_id: &str) -> Result<i64>;
}

pub trait DownloadTokenRepository {
    /// Insert unless the order already has a token; returns the stored token
    /// and whether this call inserted it.
    fn insert_token_if_absent(&self, token: &DownloadToken) -> Result<(DownloadToken, bool)>;

    fn get_token(&self, token: &str) -> Result<Option<DownloadToken>>;

    fn get_token_for_order(&self, order_id: &str) -> Result<Option<DownloadToken>>;

    /// Atomically consume one use: increments `download_count` and stamps
    /// `last_used_at` only while the token is under its cap and unexpired.
    /// Returns `true` iff a use was consumed.
    fn try_consume(&self, token: &str, now: DateTime<Utc>) -> Result<bool>;
}
