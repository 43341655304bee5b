//! Generic execution policies.
//!
//! Policies wrap an [`Attempt`], a repeatable async closure receiving an
//! [`AttemptContext`] with its cancellation token. The [`Executor`] stacks them with the
//! first policy outermost, so a gateway request runs as:
//!
//! ```text
//! Executor
//!  └─ RetryPolicy          retries the whole hedge race
//!      └─ HedgePolicy      primary + hedges, one outcome
//!          └─ Attempt      select upstream, send, classify
//! ```
//!
//! Nothing here knows about upstreams; the request flow plugs in its own predicates and
//! the [`PolicyError`] impl of its error type.

pub mod delay;
pub mod execution;
pub mod hedge;
pub mod retry;

pub use delay::{Delay, Jitter};
pub use execution::{attempt_fn, Attempt, AttemptContext, Executor, Policy, PolicyError};
pub use hedge::{HedgeConfig, HedgePolicy};
pub use retry::{RetryConfig, RetryEvent, RetryPolicy};
