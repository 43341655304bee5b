//! Attempts, policies and their composition.

use futures::future::BoxFuture;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Context handed to one attempt.
#[derive(Debug, Clone)]
pub struct AttemptContext {
    /// Cancelled when the attempt lost a race or the execution was abandoned.
    pub cancel: CancellationToken,
    /// Zero-based retry attempt.
    pub attempt: u32,
    /// Zero for the primary branch, `1..` for hedges.
    pub hedge: u32,
}

impl AttemptContext {
    #[must_use]
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel, attempt: 0, hedge: 0 }
    }
}

/// A repeatable unit of work.
pub type Attempt<R, E> =
    Arc<dyn Fn(AttemptContext) -> BoxFuture<'static, Result<R, E>> + Send + Sync>;

/// Wraps a plain async closure into an [`Attempt`].
pub fn attempt_fn<R, E, F, Fut>(f: F) -> Attempt<R, E>
where
    F: Fn(AttemptContext) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<R, E>> + Send + 'static,
{
    Arc::new(move |ctx: AttemptContext| -> BoxFuture<'static, Result<R, E>> { Box::pin(f(ctx)) })
}

/// Errors the policies can produce on their own.
pub trait PolicyError<R>: Sized + Send + 'static {
    /// The execution was cancelled from outside.
    fn cancelled() -> Self;

    fn is_cancelled(&self) -> bool;

    /// The retry budget ran out; `last` is the final outcome.
    fn exceeded(attempts: u32, last: Result<R, Self>) -> Self;
}

/// Wraps an attempt with extra behaviour.
pub trait Policy<R, E>: Send + Sync {
    fn apply(self: Arc<Self>, next: Attempt<R, E>) -> Attempt<R, E>;
}

/// Ordered policy stack. The first policy added is the outermost.
pub struct Executor<R, E> {
    policies: Vec<Arc<dyn Policy<R, E>>>,
}

impl<R, E> Default for Executor<R, E> {
    fn default() -> Self {
        Self { policies: Vec::new() }
    }
}

impl<R, E> Executor<R, E>
where
    R: Send + 'static,
    E: PolicyError<R>,
{
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, policy: Arc<dyn Policy<R, E>>) -> Self {
        self.policies.push(policy);
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Wraps `attempt` in every policy.
    #[must_use]
    pub fn compose(&self, attempt: Attempt<R, E>) -> Attempt<R, E> {
        self.policies.iter().rev().fold(attempt, |next, policy| Arc::clone(policy).apply(next))
    }

    /// Runs `attempt` through the policy stack.
    pub async fn execute(&self, cancel: CancellationToken, attempt: Attempt<R, E>) -> Result<R, E> {
        if cancel.is_cancelled() {
            return Err(E::cancelled());
        }
        let composed = self.compose(attempt);
        composed(AttemptContext::new(cancel)).await
    }
}
