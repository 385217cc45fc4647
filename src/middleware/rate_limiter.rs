//! Rate limiting middleware

use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{collections::HashMap, sync::Arc, time::Instant};
use tokio::sync::RwLock;

/// Token bucket per client
#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(max_tokens: f64) -> Self {
        Self {
            tokens: max_tokens,
            last_update: Instant::now(),
        }
    }

    fn try_consume(&mut self, tokens_per_second: f64, max_tokens: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();

        self.tokens = (self.tokens + elapsed * tokens_per_second).min(max_tokens);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Rate limiter state shared across requests
#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<RwLock<HashMap<String, TokenBucket>>>,
    tokens_per_second: f64,
    max_tokens: f64,
}

impl RateLimiter {
    /// Create a new rate limiter allowing a burst of twice the steady rate
    pub fn new(requests_per_second: u32) -> Self {
        Self {
            buckets: Arc::new(RwLock::new(HashMap::new())),
            tokens_per_second: requests_per_second as f64,
            max_tokens: (requests_per_second * 2) as f64,
        }
    }

    /// Check if a request from the given client key is allowed
    pub async fn check(&self, key: &str) -> bool {
        let mut buckets = self.buckets.write().await;

        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::new(self.max_tokens));

        bucket.try_consume(self.tokens_per_second, self.max_tokens)
    }
}

/// Extract the client key from forwarding headers, falling back to a shared
/// bucket when none are present.
fn client_key(request: &Request) -> String {
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.split(',').next().unwrap_or(s).trim().to_string())
        .or_else(|| {
            request
                .headers()
                .get("x-real-ip")
                .and_then(|h| h.to_str().ok())
                .map(|s| s.to_string())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

type BoxedResponseFuture = std::pin::Pin<Box<dyn std::future::Future<Output = Response> + Send>>;

/// Build the rate limiting middleware layer function
pub fn rate_limit_layer(
    limiter: RateLimiter,
) -> impl Fn(Request, Next) -> BoxedResponseFuture + Clone {
    move |request: Request, next: Next| -> BoxedResponseFuture {
        let limiter = limiter.clone();
        Box::pin(async move {
            let key = client_key(&request);

            if !limiter.check(&key).await {
                tracing::warn!(client = %key, "Rate limit exceeded");
                return (StatusCode::TOO_MANY_REQUESTS, "Too many requests").into_response();
            }

            next.run(request).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_allows_within_limit() {
        let limiter = RateLimiter::new(10);
        for _ in 0..10 {
            assert!(limiter.check("client-a").await);
        }
    }

    #[tokio::test]
    async fn test_blocks_beyond_burst() {
        let limiter = RateLimiter::new(2);
        // Burst allowance is 2x the steady rate
        assert!(limiter.check("client-b").await);
        assert!(limiter.check("client-b").await);
        assert!(limiter.check("client-b").await);
        assert!(limiter.check("client-b").await);
        assert!(!limiter.check("client-b").await);
    }

    #[tokio::test]
    async fn test_buckets_are_per_client() {
        let limiter = RateLimiter::new(1);
        assert!(limiter.check("client-c").await);
        assert!(limiter.check("client-d").await);
    }
}
