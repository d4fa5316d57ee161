use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};
use uuid::Uuid;

use super::{create_pool, init_db, DbPool};
use super::{BookRepository, DownloadTokenRepository, OrderRepository};
use crate::error::{AppError, Result};
use crate::models::{Book, DownloadToken, NewOrder, Order};

const BOOK_COLS: &str =
    "id, title, price_cents, currency, ebook_file_ref, direct_sale_allowed, cover_ref";

const ORDER_COLS: &str = "id, customer_email, customer_name, transaction_id, provider, book_id, \
     format_type, amount_cents, currency, status, completed_at, created_at";

const TOKEN_COLS: &str = "token, order_id, book_id, max_downloads, download_count, expires_at, \
     last_used_at, created_at";

/// Pool-backed store implementing every repository trait.
#[derive(Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database file and initialise the schema.
    pub fn open(database_path: &str) -> Result<Self> {
        let pool = create_pool(database_path)?;
        {
            let conn = pool.get()?;
            init_db(&conn)?;
        }
        Ok(Self::new(pool))
    }
}

trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

fn query_one<T: FromRow>(conn: &Connection, sql: &str, params: &[&dyn ToSql]) -> Result<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

fn parse_enum<T: std::str::FromStr>(row: &Row, col: usize, col_name: &str) -> rusqlite::Result<T> {
    row.get::<_, String>(col)?.parse::<T>().map_err(|_| {
        rusqlite::Error::InvalidColumnType(col, col_name.to_string(), rusqlite::types::Type::Text)
    })
}

fn ts(row: &Row, col: usize) -> rusqlite::Result<DateTime<Utc>> {
    let secs: i64 = row.get(col)?;
    DateTime::from_timestamp(secs, 0).ok_or(rusqlite::Error::IntegralValueOutOfRange(col, secs))
}

fn ts_opt(row: &Row, col: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<i64>>(col)? {
        Some(secs) => DateTime::from_timestamp(secs, 0)
            .map(Some)
            .ok_or(rusqlite::Error::IntegralValueOutOfRange(col, secs)),
        None => Ok(None),
    }
}

impl FromRow for Book {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Book {
            id: row.get(0)?,
            title: row.get(1)?,
            price_cents: row.get(2)?,
            currency: row.get(3)?,
            ebook_file_ref: row.get(4)?,
            direct_sale_allowed: row.get::<_, i64>(5)? != 0,
            cover_ref: row.get(6)?,
        })
    }
}

impl FromRow for Order {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Order {
            id: row.get(0)?,
            customer_email: row.get(1)?,
            customer_name: row.get(2)?,
            transaction_id: row.get(3)?,
            provider: row.get(4)?,
            book_id: row.get(5)?,
            format_type: parse_enum(row, 6, "format_type")?,
            amount_cents: row.get(7)?,
            currency: row.get(8)?,
            status: parse_enum(row, 9, "status")?,
            completed_at: ts_opt(row, 10)?,
            created_at: ts(row, 11)?,
        })
    }
}

impl FromRow for DownloadToken {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(DownloadToken {
            token: row.get(0)?,
            order_id: row.get(1)?,
            book_id: row.get(2)?,
            max_downloads: row.get(3)?,
            download_count: row.get(4)?,
            expires_at: ts(row, 5)?,
            last_used_at: ts_opt(row, 6)?,
            created_at: ts(row, 7)?,
        })
    }
}

impl BookRepository for SqliteStore {
    fn get_book(&self, id: &str) -> Result<Option<Book>> {
        let conn = self.pool.get()?;
        query_one(
            &conn,
            &format!("SELECT {} FROM books WHERE id = ?1", BOOK_COLS),
            &[&id],
        )
    }

    fn upsert_book(&self, book: &Book) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO books (id, title, price_cents, currency, ebook_file_ref,
                                direct_sale_allowed, cover_ref, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                price_cents = excluded.price_cents,
                currency = excluded.currency,
                ebook_file_ref = excluded.ebook_file_ref,
                direct_sale_allowed = excluded.direct_sale_allowed,
                cover_ref = excluded.cover_ref,
                updated_at = excluded.updated_at",
            params![
                book.id,
                book.title,
                book.price_cents,
                book.currency,
                book.ebook_file_ref,
                book.direct_sale_allowed as i64,
                book.cover_ref,
                Utc::now().timestamp(),
            ],
        )?;
        Ok(())
    }
}

impl OrderRepository for SqliteStore {
    fn insert_order_if_absent(&self, order: &NewOrder) -> Result<(Order, bool)> {
        let conn = self.pool.get()?;
        let now = Utc::now().timestamp();
        let completed_at = match order.status {
            crate::models::OrderStatus::Completed => Some(now),
            crate::models::OrderStatus::Pending => None,
        };

        let affected = conn.execute(
            "INSERT INTO orders (id, customer_email, customer_name, transaction_id, provider,
                                 book_id, format_type, amount_cents, currency, status,
                                 completed_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(transaction_id) DO NOTHING",
            params![
                Uuid::new_v4().to_string(),
                order.customer_email,
                order.customer_name,
                order.transaction_id,
                order.provider,
                order.book_id,
                order.format_type.as_str(),
                order.amount_cents,
                order.currency,
                order.status.as_str(),
                completed_at,
                now,
            ],
        )?;

        let stored: Order = query_one(
            &conn,
            &format!("SELECT {} FROM orders WHERE transaction_id = ?1", ORDER_COLS),
            &[&order.transaction_id],
        )?
        .ok_or_else(|| {
            AppError::Persistence(format!(
                "order for transaction {} missing after insert",
                order.transaction_id
            ))
        })?;

        Ok((stored, affected > 0))
    }

    fn get_order(&self, id: &str) -> Result<Option<Order>> {
        let conn = self.pool.get()?;
        query_one(
            &conn,
            &format!("SELECT {} FROM orders WHERE id = ?1", ORDER_COLS),
            &[&id],
        )
    }

    fn get_order_by_transaction(&self, transaction_id: &str) -> Result<Option<Order>> {
        let conn = self.pool.get()?;
        query_one(
            &conn,
            &format!("SELECT {} FROM orders WHERE transaction_id = ?1", ORDER_COLS),
            &[&transaction_id],
        )
    }

    fn count_orders_by_transaction(&self, transaction_id: &str) -> Result<i64> {
        let conn = self.pool.get()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM orders WHERE transaction_id = ?1",
            params![transaction_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

impl DownloadTokenRepository for SqliteStore {
    fn insert_token_if_absent(&self, token: &DownloadToken) -> Result<(DownloadToken, bool)> {
        let conn = self.pool.get()?;
        let affected = conn.execute(
            "INSERT INTO download_tokens (token, order_id, book_id, max_downloads,
                                          download_count, expires_at, last_used_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(order_id) DO NOTHING",
            params![
                token.token,
                token.order_id,
                token.book_id,
                token.max_downloads,
                token.download_count,
                token.expires_at.timestamp(),
                token.last_used_at.map(|t| t.timestamp()),
                token.created_at.timestamp(),
            ],
        )?;

        let stored: DownloadToken = query_one(
            &conn,
            &format!("SELECT {} FROM download_tokens WHERE order_id = ?1", TOKEN_COLS),
            &[&token.order_id],
        )?
        .ok_or_else(|| {
            AppError::Persistence(format!(
                "download token for order {} missing after insert",
                token.order_id
            ))
        })?;

        Ok((stored, affected > 0))
    }

    fn get_token(&self, token: &str) -> Result<Option<DownloadToken>> {
        let conn = self.pool.get()?;
        query_one(
            &conn,
            &format!("SELECT {} FROM download_tokens WHERE token = ?1", TOKEN_COLS),
            &[&token],
        )
    }

    fn get_token_for_order(&self, order_id: &str) -> Result<Option<DownloadToken>> {
        let conn = self.pool.get()?;
        query_one(
            &conn,
            &format!("SELECT {} FROM download_tokens WHERE order_id = ?1", TOKEN_COLS),
            &[&order_id],
        )
    }

    fn try_consume(&self, token: &str, now: DateTime<Utc>) -> Result<bool> {
        let conn = self.pool.get()?;
        let now = now.timestamp();
        let affected = conn.execute(
            "UPDATE download_tokens
             SET download_count = download_count + 1, last_used_at = ?2
             WHERE token = ?1 AND download_count < max_downloads AND expires_at > ?2",
            params![token, now],
        )?;
        Ok(affected == 1)
    }
}
