//! Checkout attempt throttling, counted in Redis so every instance sees the
//! same window. Without a Redis URL the throttle is off.

use axum::http::HeaderMap;
use chrono::Utc;
use redis::AsyncCommands;

use crate::error::{AppError, Result};

const WINDOW_SECS: i64 = 60;

#[derive(Clone)]
pub struct CheckoutThrottle {
    redis_client: Option<redis::Client>,
    limit: u32,
}

impl CheckoutThrottle {
    pub fn new(redis_url: Option<String>, limit: u32) -> Self {
        let redis_client = redis_url.and_then(|url| {
            redis::Client::open(url)
                .map_err(|e| tracing::error!("Redis client error, checkout throttle disabled: {}", e))
                .ok()
        });

        Self {
            redis_client,
            limit,
        }
    }

    pub fn disabled() -> Self {
        Self {
            redis_client: None,
            limit: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.redis_client.is_some()
    }

    /// Count one checkout attempt for `client_key` and refuse it once the
    /// window's limit is exceeded. Redis failures let the attempt through.
    pub async fn check(&self, client_key: Option<&str>) -> Result<()> {
        let (Some(client), Some(key)) = (&self.redis_client, client_key) else {
            return Ok(());
        };

        match Self::hit(client, key).await {
            Ok(count) if count > self.limit as i64 => {
                tracing::warn!(client = key, count, "Checkout attempts throttled");
                Err(AppError::CheckoutThrottled)
            }
            Ok(_) => Ok(()),
            Err(e) => {
                tracing::warn!("Checkout throttle unavailable: {}", e);
                Ok(())
            }
        }
    }

    async fn hit(client: &redis::Client, key: &str) -> redis::RedisResult<i64> {
        let mut con = client.get_multiplexed_async_connection().await?;
        let bucket = window_key(key, Utc::now().timestamp());
        let count: i64 = con.incr(&bucket, 1).await?;
        if count == 1 {
            redis::cmd("EXPIRE")
                .arg(&bucket)
                .arg(WINDOW_SECS)
                .query_async::<_, ()>(&mut con)
                .await?;
        }
        Ok(count)
    }
}

fn window_key(client_key: &str, now_secs: i64) -> String {
    format!("checkout:{}:{}", client_key, now_secs / WINDOW_SECS)
}

/// First address in `X-Forwarded-For`, as set by the fronting proxy.
pub fn client_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")?
        .to_str()
        .ok()?
        .split(',')
        .next()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}
