use std::env;
use std::time::Duration;

/// Server-wide settings. Provider credentials live next to their clients
/// (`StripeConfig`, `PayPalConfig`).
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    /// Public URL of this service, used for provider return URLs.
    pub public_base_url: String,
    /// Storefront URL, used for success/cancel pages and CORS.
    pub site_url: String,
    /// Prefix for ebook file references that are not already URLs.
    pub files_base_url: String,
    pub provider_timeout: Duration,
    pub redis_url: Option<String>,
    pub checkout_rate_limit: u32,
}

impl Config {
    pub fn from_env() -> Self {
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let public_base_url = env::var("PUBLIC_BASE_URL")
            .unwrap_or_else(|_| format!("http://localhost:{}", port));
        let files_base_url = env::var("FILES_BASE_URL")
            .unwrap_or_else(|_| format!("{}/files", public_base_url.trim_end_matches('/')));

        let provider_timeout_secs: u64 = env::var("PROVIDER_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(15);

        Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "fulfillment.db".to_string()),
            public_base_url,
            site_url: env::var("SITE_URL").unwrap_or_else(|_| "http://localhost:5173".to_string()),
            files_base_url,
            provider_timeout: Duration::from_secs(provider_timeout_secs),
            redis_url: env::var("REDIS_URL").ok().filter(|s| !s.is_empty()),
            checkout_rate_limit: env::var("CHECKOUT_RATE_LIMIT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn checkout_urls(&self) -> CheckoutUrls {
        CheckoutUrls {
            site_url: self.site_url.trim_end_matches('/').to_string(),
            public_base_url: self.public_base_url.trim_end_matches('/').to_string(),
        }
    }
}

/// Where shoppers are sent back to after leaving the provider's hosted page.
#[derive(Debug, Clone)]
pub struct CheckoutUrls {
    pub site_url: String,
    pub public_base_url: String,
}

impl CheckoutUrls {
    pub fn stripe_success(&self) -> String {
        format!(
            "{}/checkout/success?session_id={{CHECKOUT_SESSION_ID}}",
            self.site_url
        )
    }

    pub fn paypal_return(&self) -> String {
        format!("{}/checkout/paypal/return", self.public_base_url)
    }

    pub fn paypal_success(&self) -> String {
        format!("{}/checkout/success?provider=paypal", self.site_url)
    }

    pub fn checkout_error(&self) -> String {
        format!("{}/checkout/error", self.site_url)
    }

    pub fn cancel(&self, book_id: &str) -> String {
        format!("{}/books/{}", self.site_url, book_id)
    }
}
