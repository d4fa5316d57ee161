//! Fulfillment backend for direct ebook sales: hosted checkout with Stripe or
//! PayPal, webhook-driven order recording, and capped, expiring download
//! links.

pub mod checkout;
pub mod config;
pub mod db;
pub mod error;
pub mod fulfillment;
pub mod models;
pub mod orders;
pub mod paypal_handler;
pub mod redemption;
pub mod routes;
pub mod state;
pub mod stripe_handler;
pub mod throttle;
pub mod tokens;

pub use routes::app;
