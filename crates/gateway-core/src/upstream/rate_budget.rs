//! Per-upstream request budgets.
//!
//! Token bucket per configured upstream. Upstreams without a configured limit always have
//! capacity. Checking capacity does not consume a token; the strategy consumes one only
//! once the upstream has been selected.

use ahash::AHashMap;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Request budget of one upstream.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RateLimitConfig {
    /// Sustained requests per second.
    pub rps: u32,

    /// Bucket size (default: same as `rps`).
    #[serde(default)]
    pub burst: Option<u32>,
}

impl RateLimitConfig {
    fn capacity(&self) -> f64 {
        f64::from(self.burst.unwrap_or(self.rps).max(1))
    }
}

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn refill(&mut self, limit: &RateLimitConfig, now: Instant) {
        let elapsed = now.duration_since(self.last_refill);
        let added = elapsed.as_secs_f64() * f64::from(limit.rps);
        if added > 0.0 {
            self.tokens = (self.tokens + added).min(limit.capacity());
            self.last_refill = now;
        }
    }
}

/// Token buckets keyed by upstream id.
#[derive(Debug, Default)]
pub struct RateBudget {
    limits: AHashMap<String, RateLimitConfig>,
    buckets: DashMap<String, TokenBucket>,
}

impl RateBudget {
    #[must_use]
    pub fn new(limits: AHashMap<String, RateLimitConfig>) -> Self {
        Self { limits, buckets: DashMap::new() }
    }

    /// Budget without limits; every upstream always has capacity.
    #[must_use]
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Whether at least one request may be sent to the upstream right now.
    #[must_use]
    pub fn has_capacity(&self, upstream_id: &str) -> bool {
        let Some(limit) = self.limits.get(upstream_id) else {
            return true;
        };
        let now = Instant::now();
        let mut bucket = self
            .buckets
            .entry(upstream_id.to_string())
            .or_insert_with(|| TokenBucket { tokens: limit.capacity(), last_refill: now });
        bucket.refill(limit, now);
        bucket.tokens >= 1.0
    }

    /// Consumes one token. Returns `false` if the bucket was empty.
    pub fn acquire(&self, upstream_id: &str) -> bool {
        let Some(limit) = self.limits.get(upstream_id) else {
            return true;
        };
        let now = Instant::now();
        let mut bucket = self
            .buckets
            .entry(upstream_id.to_string())
            .or_insert_with(|| TokenBucket { tokens: limit.capacity(), last_refill: now });
        bucket.refill(limit, now);

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}
