//! Retry policy.
//!
//! ```text
//! attempt ──► abort_if? ──yes──► return outcome
//!    ▲           │no
//!    │        error in return_previous_on and a previous outcome exists? ──yes──► return previous
//!    │           │no
//!    │        handle_if? ──no──► return outcome
//!    │           │yes
//!    │        budget left? ──no──► last failure | exceeded(attempts, last)
//!    │           │yes
//!    └── sleep ◄─┴── on_retry(event)
//! ```
//!
//! Sleeps are cancellable; a cancelled execution returns [`PolicyError::cancelled`].

use super::{
    delay::{Delay, Jitter},
    execution::{Attempt, AttemptContext, Policy, PolicyError},
};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tokio::time::Instant;
use tracing::debug;

/// Retry tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first one (default: 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Stop retrying after this many milliseconds since the first attempt.
    #[serde(default)]
    pub max_duration_ms: Option<u64>,

    #[serde(default)]
    pub delay: Delay,

    #[serde(default)]
    pub jitter: Option<Jitter>,

    /// Return the last failure verbatim instead of an exceeded error.
    #[serde(default)]
    pub return_last_failure: bool,
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            max_duration_ms: None,
            delay: Delay::default(),
            jitter: None,
            return_last_failure: false,
        }
    }
}

/// Predicate over an attempt outcome.
pub type OutcomePredicate<R, E> = Arc<dyn Fn(&Result<R, E>) -> bool + Send + Sync>;

/// Predicate over an attempt error.
pub type ErrorPredicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Emitted before every retry.
pub struct RetryEvent<'a, R, E> {
    /// Attempts made so far.
    pub attempts: u32,
    pub outcome: &'a Result<R, E>,
    pub delay: Duration,
}

pub type RetryListener<R, E> = Arc<dyn for<'a> Fn(RetryEvent<'a, R, E>) + Send + Sync>;

/// Retries an attempt until it succeeds, aborts or runs out of budget.
pub struct RetryPolicy<R, E> {
    config: RetryConfig,
    handle_if: OutcomePredicate<R, E>,
    abort_if: Option<OutcomePredicate<R, E>>,
    return_previous_on: Option<ErrorPredicate<E>>,
    on_retry: Option<RetryListener<R, E>>,
}

impl<R, E> RetryPolicy<R, E>
where
    R: Send + 'static,
    E: PolicyError<R>,
{
    /// Policy retrying every error.
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            handle_if: Arc::new(|outcome: &Result<R, E>| outcome.is_err()),
            abort_if: None,
            return_previous_on: None,
            on_retry: None,
        }
    }

    /// Outcomes that are retried.
    #[must_use]
    pub fn handle_if(mut self, predicate: impl Fn(&Result<R, E>) -> bool + Send + Sync + 'static) -> Self {
        self.handle_if = Arc::new(predicate);
        self
    }

    /// Outcomes that stop the loop immediately.
    #[must_use]
    pub fn abort_if(mut self, predicate: impl Fn(&Result<R, E>) -> bool + Send + Sync + 'static) -> Self {
        self.abort_if = Some(Arc::new(predicate));
        self
    }

    /// Errors that make the loop return the previous outcome instead, if there is one.
    #[must_use]
    pub fn return_previous_on(mut self, predicate: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        self.return_previous_on = Some(Arc::new(predicate));
        self
    }

    #[must_use]
    pub fn on_retry(mut self, listener: impl for<'a> Fn(RetryEvent<'a, R, E>) + Send + Sync + 'static) -> Self {
        self.on_retry = Some(Arc::new(listener));
        self
    }

    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    async fn run(self: Arc<Self>, next: Attempt<R, E>, ctx: AttemptContext) -> Result<R, E> {
        let started = Instant::now();
        let max_attempts = self.config.max_attempts.max(1);
        let max_duration = self.config.max_duration_ms.map(Duration::from_millis);
        let mut previous: Option<Result<R, E>> = None;
        let mut attempts = 0u32;

        loop {
            if ctx.cancel.is_cancelled() {
                return Err(E::cancelled());
            }

            let outcome = next(AttemptContext { cancel: ctx.cancel.clone(), attempt: attempts, hedge: ctx.hedge }).await;
            attempts += 1;

            if self.abort_if.as_ref().is_some_and(|abort| abort(&outcome)) {
                return outcome;
            }

            if let (Err(error), Some(return_previous)) = (&outcome, &self.return_previous_on) {
                if return_previous(error) {
                    if let Some(previous) = previous.take() {
                        debug!(attempts, "retry returning previous outcome");
                        return previous;
                    }
                }
            }

            if !(self.handle_if)(&outcome) {
                return outcome;
            }

            let out_of_time = max_duration.is_some_and(|limit| started.elapsed() >= limit);
            if attempts >= max_attempts || out_of_time {
                debug!(attempts, out_of_time, "retry budget exhausted");
                return if self.config.return_last_failure { outcome } else { Err(E::exceeded(attempts, outcome)) };
            }

            let delay = self.config.delay.compute(attempts, self.config.jitter.as_ref());
            if let Some(listener) = &self.on_retry {
                listener(RetryEvent { attempts, outcome: &outcome, delay });
            }

            tokio::select! {
                biased;
                () = ctx.cancel.cancelled() => return Err(E::cancelled()),
                () = tokio::time::sleep(delay) => {}
            }
            previous = Some(outcome);
        }
    }
}

impl<R, E> Policy<R, E> for RetryPolicy<R, E>
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
