//! Delay schedules between retry attempts.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Base delay before the next attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Delay {
    /// Same delay before every retry.
    Fixed { ms: u64 },
    /// `initial_ms * factor^(retry - 1)`, capped at `max_ms`.
    Backoff {
        initial_ms: u64,
        max_ms: u64,
        #[serde(default = "default_backoff_factor")]
        factor: f64,
    },
    /// Uniformly random in `[min_ms, max_ms]`.
    Random { min_ms: u64, max_ms: u64 },
}

fn default_backoff_factor() -> f64 {
    2.0
}

impl Default for Delay {
    fn default() -> Self {
        Self::Fixed { ms: 0 }
    }
}

/// Random spread added on top of the base delay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Jitter {
    /// Shifts the delay by up to `ms` in either direction.
    Fixed { ms: u64 },
    /// Shifts the delay by up to `factor * delay` in either direction.
    Factor { factor: f64 },
}

impl Delay {
    /// Base delay before retry number `retry` (1 for the first retry).
    #[must_use]
    pub fn base(&self, retry: u32) -> Duration {
        match self {
            Self::Fixed { ms } => Duration::from_millis(*ms),
            Self::Backoff { initial_ms, max_ms, factor } => {
                let exponent = i32::try_from(retry.saturating_sub(1).min(30)).unwrap_or(30);
                #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let millis = (*initial_ms as f64 * factor.max(1.0).powi(exponent)).min(*max_ms as f64) as u64;
                Duration::from_millis(millis)
            }
            Self::Random { min_ms, max_ms } => {
                let (low, high) = if min_ms <= max_ms { (*min_ms, *max_ms) } else { (*max_ms, *min_ms) };
                Duration::from_millis(rand::rng().random_range(low..=high))
            }
        }
    }

    /// Delay before retry number `retry` with `jitter` applied.
    #[must_use]
    pub fn compute(&self, retry: u32, jitter: Option<&Jitter>) -> Duration {
        let base = self.base(retry);
        #[allow(clippy::cast_possible_truncation)]
        let base_ms = base.as_millis() as u64;

        let spread = match jitter {
            None => return base,
            Some(Jitter::Fixed { ms }) => *ms,
            #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            Some(Jitter::Factor { factor }) => (base_ms as f64 * factor.clamp(0.0, 1.0)) as u64,
        };
        if spread == 0 {
            return base;
        }

        let offset = rand::rng().random_range(0..=spread * 2);
        Duration::from_millis((base_ms + offset).saturating_sub(spread))
    }
}
