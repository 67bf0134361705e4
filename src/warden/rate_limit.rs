//! Per-client request throttling.

use async_trait::async_trait;
use std::{sync::Arc, time::Duration};
use tracing::warn;

use crate::store::KeyedStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited,
}

#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn admit(&self, client: &str) -> RateLimitDecision;
}

/// Used when rate limiting is switched off (`--rate-limit 0`).
#[derive(Clone, Debug)]
pub struct NoopRateLimiter;

#[async_trait]
impl RateLimiter for NoopRateLimiter {
    async fn admit(&self, _client: &str) -> RateLimitDecision {
        RateLimitDecision::Allowed
    }
}

/// Sliding window of at most `limit` requests per `window`, kept in the shared
/// store under `<prefix>:mid:rl:<client>`.
/// Store failures admit the request.
#[derive(Clone)]
pub struct StoreRateLimiter {
    store: Arc<dyn KeyedStore>,
    prefix: String,
    limit: u64,
    window: Duration,
}

impl StoreRateLimiter {
    pub fn new(
        store: Arc<dyn KeyedStore>,
        prefix: &str,
        limit: u64,
        window: Duration,
    ) -> Self {
        Self {
            store,
            prefix: format!("{prefix}:mid:rl"),
            limit,
            window,
        }
    }
}

#[async_trait]
impl RateLimiter for StoreRateLimiter {
    async fn admit(&self, client: &str) -> RateLimitDecision {
        let key = format!("{}:{client}", self.prefix);
        match self
            .store
            .admit_sliding_window(&key, self.limit, self.window)
            .await
        {
            Ok(true) => RateLimitDecision::Allowed,
            Ok(false) => RateLimitDecision::Limited,
            Err(err) => {
                warn!("Rate limiter unavailable, admitting {client}: {err}");
                RateLimitDecision::Allowed
            }
        }
    }
}
