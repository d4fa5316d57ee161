use rusqlite::Connection;

/// Create the fulfillment tables. Safe to run on every startup.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        -- Catalog (mutated by the admin back-office, read here)
        CREATE TABLE IF NOT EXISTS books (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            price_cents INTEGER,
            currency TEXT NOT NULL DEFAULT 'usd',
            ebook_file_ref TEXT,
            direct_sale_allowed INTEGER NOT NULL DEFAULT 0,
            cover_ref TEXT,
            updated_at INTEGER NOT NULL
        );

        -- One row per real-world payment. transaction_id is the idempotency key.
        CREATE TABLE IF NOT EXISTS orders (
            id TEXT PRIMARY KEY,
            customer_email TEXT NOT NULL,
            customer_name TEXT,
            transaction_id TEXT NOT NULL UNIQUE,
            provider TEXT NOT NULL,
            book_id TEXT NOT NULL REFERENCES books(id),
            format_type TEXT NOT NULL,
            amount_cents INTEGER NOT NULL,
            currency TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('pending', 'completed')),
            completed_at INTEGER,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_orders_book ON orders(book_id);

        -- UNIQUE(order_id) makes issuance idempotent per order.
        CREATE TABLE IF NOT EXISTS download_tokens (
            token TEXT PRIMARY KEY,
            order_id TEXT NOT NULL UNIQUE REFERENCES orders(id),
            book_id TEXT NOT NULL REFERENCES books(id),
            max_downloads INTEGER NOT NULL CHECK (max_downloads > 0),
            download_count INTEGER NOT NULL DEFAULT 0
                CHECK (download_count >= 0 AND download_count <= max_downloads),
            expires_at INTEGER NOT NULL,
            last_used_at INTEGER,
            created_at INTEGER NOT NULL
        );
        "#,
    )
}
