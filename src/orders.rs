//! Order recording. The provider transaction id is the idempotency key: one
//! real-world payment produces at most one order.

use crate::db::{BookRepository, OrderRepository};
use crate::error::{AppError, Result};
use crate::models::{FormatType, NewOrder, Order, OrderStatus};

#[derive(Debug, Clone)]
pub struct RecordOrder {
    pub provider: String,
    pub transaction_id: String,
    pub book_id: String,
    pub format_type: FormatType,
    pub customer_email: String,
    pub customer_name: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
}

#[derive(Debug, Clone)]
pub struct RecordedOrder {
    pub order: Order,
    /// `false` when an order for this transaction already existed.
    pub newly_recorded: bool,
}

/// Record a completed purchase, or return the existing order for the same
/// transaction id.
pub fn record_order<S>(store: &S, input: RecordOrder) -> Result<RecordedOrder>
where
    S: BookRepository + OrderRepository + ?Sized,
{
    // Fast path for redeliveries. The insert below is what actually enforces
    // uniqueness when two deliveries race past this check.
    if let Some(order) = store.get_order_by_transaction(&input.transaction_id)? {
        tracing::info!(
            transaction_id = %input.transaction_id,
            order_id = %order.id,
            "Order already recorded for transaction"
        );
        return Ok(RecordedOrder {
            order,
            newly_recorded: false,
        });
    }

    if store.get_book(&input.book_id)?.is_none() {
        return Err(AppError::BookNotFound);
    }

    let new_order = NewOrder {
        customer_email: input.customer_email,
        customer_name: input.customer_name,
        transaction_id: input.transaction_id,
        provider: input.provider,
        book_id: input.book_id,
        format_type: input.format_type,
        amount_cents: input.amount_cents,
        currency: input.currency.to_lowercase(),
        status: OrderStatus::Completed,
    };

    let (order, inserted) = store.insert_order_if_absent(&new_order)?;

    if inserted {
        tracing::info!(
            order_id = %order.id,
            transaction_id = %order.transaction_id,
            book_id = %order.book_id,
            provider = %order.provider,
            amount_cents = order.amount_cents,
            "Order recorded"
        );
    } else {
        tracing::info!(
            order_id = %order.id,
            transaction_id = %order.transaction_id,
            "Concurrent delivery already recorded this order"
        );
    }

    Ok(RecordedOrder {
        order,
        newly_recorded: inserted,
    })
}
