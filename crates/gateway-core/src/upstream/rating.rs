//! Per-dimension request statistics and the rating derived from them.
//!
//! A dimension is one `(chain, method, upstream)` triple. Every finished request is recorded
//! into its dimension; a background task periodically ranks the upstreams of each
//! `(chain, method)` pair by error rate, then by p90 latency, and publishes the ranking as
//! an immutable snapshot read by the rating strategy.

use super::latency::LatencyWindow;
use ahash::AHashMap;
use arc_swap::ArcSwap;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Rating tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatingConfig {
    /// Seconds between ranking refreshes (default: 10).
    #[serde(default = "default_refresh_interval_seconds")]
    pub refresh_interval_seconds: u64,

    /// Samples a dimension needs before it is ranked (default: 5).
    #[serde(default = "default_min_samples")]
    pub min_samples: u64,

    /// Latency samples kept per dimension (default: 512).
    #[serde(default = "default_window_size")]
    pub window_size: usize,
}

fn default_refresh_interval_seconds() -> u64 {
    10
}

fn default_min_samples() -> u64 {
    5
}

fn default_window_size() -> usize {
    512
}

impl Default for RatingConfig {
    fn default() -> Self {
        Self {
            refresh_interval_seconds: default_refresh_interval_seconds(),
            min_samples: default_min_samples(),
            window_size: default_window_size(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DimensionKey {
    chain: Arc<str>,
    method: Arc<str>,
    upstream: Arc<str>,
}

struct Dimension {
    latency: LatencyWindow,
    successes: AtomicU64,
    errors: AtomicU64,
}

/// Point-in-time statistics of one dimension.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DimensionStats {
    pub requests: u64,
    pub error_rate: f64,
    pub p90_ms: Option<u64>,
}

/// Request statistics keyed by chain, method and upstream.
pub struct DimensionTracker {
    dimensions: DashMap<DimensionKey, Arc<Dimension>>,
    window_size: usize,
}

impl DimensionTracker {
    #[must_use]
    pub fn new(window_size: usize) -> Self {
        Self { dimensions: DashMap::new(), window_size }
    }

    /// Records one finished request.
    pub fn record(&self, chain: &str, method: &str, upstream: &str, latency: Duration, success: bool) {
        let key = DimensionKey { chain: Arc::from(chain), method: Arc::from(method), upstream: Arc::from(upstream) };
        let dimension = Arc::clone(
            self.dimensions
                .entry(key)
                .or_insert_with(|| {
                    Arc::new(Dimension {
                        latency: LatencyWindow::new(self.window_size),
                        successes: AtomicU64::new(0),
                        errors: AtomicU64::new(0),
                    })
                })
                .value(),
        );

        dimension.latency.record(latency);
        if success {
            dimension.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            dimension.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn stats_of(dimension: &Dimension) -> DimensionStats {
        let successes = dimension.successes.load(Ordering::Relaxed);
        let errors = dimension.errors.load(Ordering::Relaxed);
        let requests = successes + errors;
        #[allow(clippy::cast_precision_loss)]
        let error_rate = if requests == 0 { 0.0 } else { errors as f64 / requests as f64 };
        DimensionStats { requests, error_rate, p90_ms: dimension.latency.quantile(0.9) }
    }

    #[must_use]
    pub fn stats(&self, chain: &str, method: &str, upstream: &str) -> Option<DimensionStats> {
        let key = DimensionKey { chain: Arc::from(chain), method: Arc::from(method), upstream: Arc::from(upstream) };
        self.dimensions.get(&key).map(|e| Self::stats_of(e.value()))
    }

    /// Latency quantile of the slowest upstream serving `method` on `chain`.
    #[must_use]
    pub fn method_quantile(&self, chain: &str, method: &str, quantile: f64) -> Option<u64> {
        self.dimensions
            .iter()
            .filter(|e| &*e.key().chain == chain && &*e.key().method == method)
            .filter_map(|e| e.value().latency.quantile(quantile))
            .max()
    }

    /// Statistics grouped by `(chain, method)`.
    fn grouped(&self) -> AHashMap<(Arc<str>, Arc<str>), Vec<(Arc<str>, DimensionStats)>> {
        let mut groups: AHashMap<(Arc<str>, Arc<str>), Vec<(Arc<str>, DimensionStats)>> = AHashMap::new();
        for entry in &self.dimensions {
            let key = entry.key();
            groups
                .entry((Arc::clone(&key.chain), Arc::clone(&key.method)))
                .or_default()
                .push((Arc::clone(&key.upstream), Self::stats_of(entry.value())));
        }
        groups
    }
}

/// Source of per-method upstream rankings.
pub trait RatingRegistry: Send + Sync {
    /// Upstreams of `chain` ordered best first for `method`. May be empty or partial.
    fn sorted_upstreams(&self, chain: &str, method: &str) -> Vec<Arc<str>>;
}

type Rankings = AHashMap<Arc<str>, AHashMap<Arc<str>, Vec<Arc<str>>>>;

/// Rating computed from a [`DimensionTracker`].
pub struct DimensionRating {
    tracker: Arc<DimensionTracker>,
    rankings: ArcSwap<Rankings>,
    config: RatingConfig,
}

impl DimensionRating {
    #[must_use]
    pub fn new(tracker: Arc<DimensionTracker>, config: RatingConfig) -> Self {
        Self { tracker, rankings: ArcSwap::from_pointee(Rankings::new()), config }
    }

    #[must_use]
    pub fn tracker(&self) -> &Arc<DimensionTracker> {
        &self.tracker
    }

    /// Recomputes all rankings from the current statistics.
    pub fn refresh(&self) {
        let mut rankings = Rankings::new();
        for ((chain, method), mut upstreams) in self.tracker.grouped() {
            upstreams.retain(|(_, stats)| stats.requests >= self.config.min_samples);
            if upstreams.is_empty() {
                continue;
            }
            upstreams.sort_by(|(id_a, a), (id_b, b)| {
                a.error_rate
                    .total_cmp(&b.error_rate)
                    .then_with(|| a.p90_ms.unwrap_or(u64::MAX).cmp(&b.p90_ms.unwrap_or(u64::MAX)))
                    .then_with(|| id_a.cmp(id_b))
            });
            debug!(
                chain = %chain,
                method = %method,
                best = %upstreams[0].0,
                ranked = upstreams.len(),
                "rating refreshed"
            );
            rankings
                .entry(chain)
                .or_default()
                .insert(method, upstreams.into_iter().map(|(id, _)| id).collect());
        }
        self.rankings.store(Arc::new(rankings));
    }

    /// Spawns the periodic refresh task.
    pub fn start(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let rating = Arc::clone(self);
        let period = Duration::from_secs(self.config.refresh_interval_seconds.max(1));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(interval_seconds = period.as_secs(), "rating refresh started");
            loop {
                tokio::select! {
                    biased;
                    () = shutdown.cancelled() => break,
                    _ = interval.tick() => rating.refresh(),
                }
            }
        })
    }
}

impl RatingRegistry for DimensionRating {
    fn sorted_upstreams(&self, chain: &str, method: &str) -> Vec<Arc<str>> {
        self.rankings
            .load()
            .get(chain)
            .and_then(|methods| methods.get(method))
            .cloned()
            .unwrap_or_default()
    }
}
