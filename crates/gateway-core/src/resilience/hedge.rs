//! Parallel hedge policy.
//!
//! The primary attempt starts immediately. When the hedge delay elapses without a
//! result, or the primary finishes with an outcome that does not end the race, all
//! hedge slots launch at once:
//!
//! ```text
//! t=0        primary ─────────────────────────────┐
//! t=delay    hedge 1 ──────────────┐              │
//!            hedge 2 ─────────┐    │              │
//!                             ▼    ▼              ▼
//!                        first outcome matching cancel_if wins,
//!                        or the first non-deferred hedge outcome after the primary failed,
//!                        otherwise the best quality once every branch is done
//! ```
//!
//! Outcomes matching `defer_if` never end the race while another branch is still
//! running. The number of hedges per launch can be capped by a limit source.
//!
//! A per-call coordinator owns the result channel, so exactly one outcome leaves the
//! policy. When it decides, it cancels the scope token of the call; the losing branches
//! observe the cancellation and are drained on a background task.

use super::execution::{Attempt, AttemptContext, Policy, PolicyError};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tokio::{sync::mpsc, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Hedge tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HedgeConfig {
    /// Whether requests on this chain are hedged (default: false).
    #[serde(default)]
    pub enabled: bool,

    /// Extra attempts launched together with the primary's delay (default: 1).
    #[serde(default = "default_max_hedges")]
    pub max_hedges: u32,

    /// Latency quantile of the method used as hedge delay (default: 0.95).
    #[serde(default = "default_latency_quantile")]
    pub latency_quantile: f64,

    /// Lower bound of the hedge delay in milliseconds (default: 50).
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,

    /// Upper bound of the hedge delay and the delay used without latency data (default: 1000).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_hedges() -> u32 {
    1
}

fn default_latency_quantile() -> f64 {
    0.95
}

fn default_min_delay_ms() -> u64 {
    50
}

fn default_max_delay_ms() -> u64 {
    1000
}

impl Default for HedgeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_hedges: default_max_hedges(),
            latency_quantile: default_latency_quantile(),
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl HedgeConfig {
    /// Hedge delay for an observed latency quantile, clamped to the configured bounds.
    #[must_use]
    pub fn delay_for(&self, observed_ms: Option<u64>) -> Duration {
        let max = self.max_delay_ms.max(self.min_delay_ms);
        let millis = observed_ms.map_or(max, |observed| observed.clamp(self.min_delay_ms, max));
        Duration::from_millis(millis)
    }
}

type OutcomeCheck<R, E> = Arc<dyn Fn(&Result<R, E>) -> bool + Send + Sync>;
type OutcomeQuality<R, E> = Arc<dyn Fn(&Result<R, E>) -> u8 + Send + Sync>;
type DelaySource = Arc<dyn Fn() -> Duration + Send + Sync>;
type HedgeLimit = Arc<dyn Fn() -> u32 + Send + Sync>;

/// Races a primary attempt against hedges launched together after a delay.
pub struct HedgePolicy<R, E> {
    delay: DelaySource,
    max_hedges: u32,
    hedge_limit: Option<HedgeLimit>,
    cancel_if: OutcomeCheck<R, E>,
    defer_if: OutcomeCheck<R, E>,
    quality: OutcomeQuality<R, E>,
    on_hedge: Option<Arc<dyn Fn(u32) + Send + Sync>>,
}

impl<R, E> HedgePolicy<R, E>
where
    R: Send + 'static,
    E: PolicyError<R>,
{
    /// Hedges after a fixed delay. Successes end the race; every error ranks equal.
    #[must_use]
    pub fn new(delay: Duration, max_hedges: u32) -> Self {
        Self {
            delay: Arc::new(move || delay),
            max_hedges,
            hedge_limit: None,
            cancel_if: Arc::new(|outcome: &Result<R, E>| outcome.is_ok()),
            defer_if: Arc::new(|_: &Result<R, E>| false),
            quality: Arc::new(|outcome: &Result<R, E>| u8::from(outcome.is_err())),
            on_hedge: None,
        }
    }

    /// Computes the delay per call.
    #[must_use]
    pub fn with_delay_source(mut self, delay: impl Fn() -> Duration + Send + Sync + 'static) -> Self {
        self.delay = Arc::new(delay);
        self
    }

    /// Outcomes that end the race as soon as they arrive.
    #[must_use]
    pub fn cancel_if(mut self, predicate: impl Fn(&Result<R, E>) -> bool + Send + Sync + 'static) -> Self {
        self.cancel_if = Arc::new(predicate);
        self
    }

    /// Outcomes that only count once every other branch is done.
    #[must_use]
    pub fn defer_if(mut self, predicate: impl Fn(&Result<R, E>) -> bool + Send + Sync + 'static) -> Self {
        self.defer_if = Arc::new(predicate);
        self
    }

    /// Caps the hedges of each launch, read when the hedges launch.
    #[must_use]
    pub fn with_hedge_limit(mut self, limit: impl Fn() -> u32 + Send + Sync + 'static) -> Self {
        self.hedge_limit = Some(Arc::new(limit));
        self
    }

    /// Ranks outcomes when no branch ended the race; lower is better.
    #[must_use]
    pub fn result_quality(mut self, quality: impl Fn(&Result<R, E>) -> u8 + Send + Sync + 'static) -> Self {
        self.quality = Arc::new(quality);
        self
    }

    /// Called with the number of hedges when they launch.
    #[must_use]
    pub fn on_hedge(mut self, listener: impl Fn(u32) + Send + Sync + 'static) -> Self {
        self.on_hedge = Some(Arc::new(listener));
        self
    }

    fn spawn_branch(
        tasks: &mut JoinSet<()>,
        results: &mpsc::Sender<(u32, Result<R, E>)>,
        next: &Attempt<R, E>,
        scope: &CancellationToken,
        attempt: u32,
        hedge: u32,
    ) {
        let results = results.clone();
        let next = Arc::clone(next);
        let ctx = AttemptContext { cancel: scope.child_token(), attempt, hedge };
        tasks.spawn(async move {
            let outcome = next(ctx).await;
            // the coordinator is gone once a winner was picked
            let _ = results.send((hedge, outcome)).await;
        });
    }

    fn launch_hedges(
        &self,
        tasks: &mut JoinSet<()>,
        results: &mpsc::Sender<(u32, Result<R, E>)>,
        next: &Attempt<R, E>,
        scope: &CancellationToken,
        attempt: u32,
    ) -> u32 {
        let hedges = self.hedge_limit.as_ref().map_or(self.max_hedges, |limit| limit().min(self.max_hedges));
        for hedge in 1..=hedges {
            Self::spawn_branch(tasks, results, next, scope, attempt, hedge);
        }
        if hedges > 0 {
            if let Some(listener) = &self.on_hedge {
                listener(hedges);
            }
        }
        hedges
    }

    async fn run(self: Arc<Self>, next: Attempt<R, E>, ctx: AttemptContext) -> Result<R, E> {
        let scope = ctx.cancel.child_token();
        let capacity = usize::try_from(self.max_hedges).unwrap_or(usize::MAX).saturating_add(1);
        let (results, mut outcomes) = mpsc::channel(capacity);
        let mut tasks = JoinSet::new();

        Self::spawn_branch(&mut tasks, &results, &next, &scope, ctx.attempt, 0);
        let mut launched = 1u32;
        let mut completed = 0u32;
        let mut hedged = self.max_hedges == 0;
        let mut primary_failed = false;
        let mut best: Option<(u8, Result<R, E>)> = None;

        let delay = tokio::time::sleep((self.delay)());
        tokio::pin!(delay);

        let winner = loop {
            tokio::select! {
                biased;
                () = ctx.cancel.cancelled() => break Err(E::cancelled()),
                Some((hedge, outcome)) = outcomes.recv() => {
                    completed += 1;
                    let deferred = (self.defer_if)(&outcome);
                    if (self.cancel_if)(&outcome) || (primary_failed && hedge != 0 && !deferred) {
                        trace!(hedge, "hedge race decided");
                        break outcome;
                    }
                    if hedge == 0 {
                        primary_failed = true;
                        if !hedged {
                            hedged = true;
                            let hedges = self.launch_hedges(&mut tasks, &results, &next, &scope, ctx.attempt);
                            launched += hedges;
                            debug!(hedges, "primary failed, hedges launched");
                        }
                    }

                    let quality = (self.quality)(&outcome);
                    if best.as_ref().is_none_or(|(current, _)| quality < *current) {
                        best = Some((quality, outcome));
                    }
                    if hedged && completed == launched {
                        match best.take() {
                            Some((_, outcome)) => break outcome,
                            None => break Err(E::cancelled()),
                        }
                    }
                }
                () = &mut delay, if !hedged => {
                    hedged = true;
                    let hedges = self.launch_hedges(&mut tasks, &results, &next, &scope, ctx.attempt);
                    launched += hedges;
                    debug!(hedges, "hedge delay elapsed, hedges launched");
                }
            }
        };

        scope.cancel();
        if !tasks.is_empty() {
            tokio::spawn(async move { while tasks.join_next().await.is_some() {} });
        }
        winner
    }
}

impl<R, E> Policy<R, E> for HedgePolicy<R, E>
where
    R: Send + 'static,
    E: PolicyError<R>,
{
    fn apply(self: Arc<Self>, next: Attempt<R, E>) -> Attempt<R, E> {
        Arc::new(move |ctx: AttemptContext| -> BoxFuture<'static, Result<R, E>> {
            Box::pin(Arc::clone(&self).run(Arc::clone(&next), ctx))
        })
    }
}
