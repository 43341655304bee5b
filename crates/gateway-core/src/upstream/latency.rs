//! Sliding window of recent latencies.
//!
//! Lock-free ring buffer; recording takes `&self` and only touches atomics. Quantiles
//! copy and sort the window on demand, which is fine for the refresh-interval readers
//! that use them (rating, hedge delay).

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::time::{Duration, Instant};

/// Window after which samples are ignored (default: 5 minutes).
const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(300);

/// Fixed-size latency window.
pub struct LatencyWindow {
    /// Samples in milliseconds plus one, so 0 marks an empty slot.
    samples: Box<[AtomicU64]>,
    write_index: AtomicUsize,
    created: Instant,
    /// Milliseconds since `created` of the last sample plus one; 0 = never.
    last_recorded: AtomicU64,
    stale_after: Duration,
}

impl LatencyWindow {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::with_stale_after(capacity, DEFAULT_STALE_AFTER)
    }

    #[must_use]
    pub fn with_stale_after(capacity: usize, stale_after: Duration) -> Self {
        let samples = (0..capacity.max(1)).map(|_| AtomicU64::new(0)).collect::<Vec<_>>();
        Self {
            samples: samples.into_boxed_slice(),
            write_index: AtomicUsize::new(0),
            created: Instant::now(),
            last_recorded: AtomicU64::new(0),
            stale_after,
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn elapsed_ms(&self) -> u64 {
        self.created.elapsed().as_millis() as u64
    }

    pub fn record(&self, latency: Duration) {
        #[allow(clippy::cast_possible_truncation)]
        let millis = latency.as_millis() as u64;
        let index = self.write_index.fetch_add(1, Ordering::Relaxed) % self.samples.len();
        self.samples[index].store(millis.saturating_add(1), Ordering::Relaxed);
        self.last_recorded.store(self.elapsed_ms().saturating_add(1), Ordering::Relaxed);
    }

    /// Whether no sample arrived within the staleness window.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        match self.last_recorded.load(Ordering::Relaxed) {
            0 => true,
            last => {
                let since = self.elapsed_ms().saturating_sub(last - 1);
                Duration::from_millis(since) > self.stale_after
            }
        }
    }

    fn collect(&self) -> Vec<u64> {
        self.samples
            .iter()
            .map(|s| s.load(Ordering::Relaxed))
            .filter(|&v| v > 0)
            .map(|v| v - 1)
            .collect()
    }

    /// Latency at `quantile` in milliseconds. `None` when empty, stale or out of range.
    #[must_use]
    pub fn quantile(&self, quantile: f64) -> Option<u64> {
        if !(0.0..=1.0).contains(&quantile) || self.is_stale() {
            return None;
        }
        let mut sorted = self.collect();
        if sorted.is_empty() {
            return None;
        }
        sorted.sort_unstable();

        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let index = ((sorted.len() as f64 - 1.0) * quantile) as usize;
        Some(sorted[index])
    }

    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.samples.iter().filter(|s| s.load(Ordering::Relaxed) > 0).count()
    }
}
