//! # Metrics
//!
//! Two paths, both lock-free:
//!
//! - [`GatewayMetrics`] records through the `metrics` facade. Whatever recorder the
//!   embedding process installs (Prometheus, statsd, none) receives the values; without a
//!   recorder every call is a no-op.
//! - [`ExecutionStats`] keeps process-local atomic counters that tests and health
//!   endpoints can read directly.
//!
//! Chain, upstream and method labels are interned so steady-state recording does not
//! allocate. The pool is bounded by the configured chains, upstreams and methods.

use crate::{types::CacheStatus, upstream::errors::UpstreamError};
use dashmap::DashMap;
use metrics::{counter, gauge, histogram};
use serde::Serialize;
use std::{
    borrow::Cow,
    sync::{
        atomic::{AtomicU64, Ordering},
        OnceLock,
    },
    time::Duration,
};

static LABEL_POOL: OnceLock<DashMap<String, &'static str>> = OnceLock::new();

#[inline]
fn label(value: &str) -> Cow<'static, str> {
    let pool = LABEL_POOL.get_or_init(DashMap::new);
    if let Some(interned) = pool.get(value) {
        return Cow::Borrowed(*interned);
    }
    let leaked: &'static str = Box::leak(value.to_string().into_boxed_str());
    pool.insert(value.to_string(), leaked);
    Cow::Borrowed(leaked)
}

/// Facade over the `metrics` macros.
pub struct GatewayMetrics;

impl GatewayMetrics {
    /// One request finished, successfully or not.
    #[allow(clippy::cast_precision_loss)]
    pub fn record_request(chain: &str, method: &str, duration: Duration, error: Option<&UpstreamError>) {
        let outcome = error.map_or("ok", UpstreamError::as_metric_str);
        counter!(
            "gateway_requests_total",
            "chain" => label(chain),
            "method" => label(method),
            "outcome" => outcome
        )
        .increment(1);
        histogram!("gateway_request_duration_seconds", "chain" => label(chain), "method" => label(method))
            .record(duration.as_secs_f64());
    }

    /// One upstream attempt finished.
    pub fn record_upstream_call(chain: &str, upstream: &str, duration: Duration, success: bool) {
        let outcome = if success { "ok" } else { "error" };
        counter!(
            "gateway_upstream_requests_total",
            "chain" => label(chain),
            "upstream" => label(upstream),
            "outcome" => outcome
        )
        .increment(1);
        histogram!("gateway_upstream_duration_seconds", "chain" => label(chain), "upstream" => label(upstream))
            .record(duration.as_secs_f64());
    }

    pub fn record_cache(chain: &str, method: &str, status: CacheStatus) {
        let status = match status {
            CacheStatus::Hit => "hit",
            _ => "miss",
        };
        counter!("gateway_cache_lookups_total", "chain" => label(chain), "method" => label(method), "status" => status)
            .increment(1);
    }

    pub fn record_cache_store(connector: &str, bytes: usize) {
        counter!("gateway_cache_stores_total", "connector" => label(connector)).increment(1);
        #[allow(clippy::cast_precision_loss)]
        histogram!("gateway_cache_store_bytes", "connector" => label(connector)).record(bytes as f64);
    }

    pub fn record_retry(chain: &str, method: &str, attempt: u32) {
        counter!("gateway_retries_total", "chain" => label(chain), "method" => label(method)).increment(1);
        gauge!("gateway_last_retry_attempt", "chain" => label(chain)).set(f64::from(attempt));
    }

    pub fn record_hedge(chain: &str, method: &str) {
        counter!("gateway_hedges_total", "chain" => label(chain), "method" => label(method)).increment(1);
    }

    pub fn record_method_ban(chain: &str, upstream: &str, method: &str) {
        counter!(
            "gateway_method_bans_total",
            "chain" => label(chain),
            "upstream" => label(upstream),
            "method" => label(method)
        )
        .increment(1);
    }

    pub fn record_active_subscriptions(count: usize) {
        #[allow(clippy::cast_precision_loss)]
        gauge!("gateway_active_subscriptions").set(count as f64);
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn record_chain_head(chain: &str, height: u64) {
        gauge!("gateway_chain_head", "chain" => label(chain)).set(height as f64);
    }
}

/// Process-local execution counters.
#[derive(Debug, Default)]
pub struct ExecutionStats {
    requests: AtomicU64,
    failures: AtomicU64,
    cache_hits: AtomicU64,
    retries: AtomicU64,
    hedges: AtomicU64,
    timeouts: AtomicU64,
    local: AtomicU64,
    subscriptions: AtomicU64,
}

/// Point-in-time copy of [`ExecutionStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionSnapshot {
    pub requests: u64,
    pub failures: u64,
    pub cache_hits: u64,
    pub retries: u64,
    pub hedges: u64,
    pub timeouts: u64,
    pub local: u64,
    pub subscriptions: u64,
}

impl ExecutionStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self, failed: bool) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_hedge(&self) {
        self.hedges.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// A request answered without an upstream.
    pub fn record_local(&self) {
        self.local.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_subscription(&self) {
        self.subscriptions.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> ExecutionSnapshot {
        ExecutionSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            hedges: self.hedges.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            local: self.local.load(Ordering::Relaxed),
            subscriptions: self.subscriptions.load(Ordering::Relaxed),
        }
    }
}
