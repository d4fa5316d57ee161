use crate::config::CheckoutUrls;
use crate::db::SqliteStore;
use crate::paypal_handler::PayPalClient;
use crate::stripe_handler::StripeClient;
use crate::throttle::CheckoutThrottle;

/// Shared by every route. Holds no mutable business state: orders and tokens
/// live in the store.
pub struct AppState {
    pub store: SqliteStore,
    pub stripe: StripeClient,
    pub paypal: PayPalClient,
    pub urls: CheckoutUrls,
    pub files_base_url: String,
    pub throttle: CheckoutThrottle,
}
