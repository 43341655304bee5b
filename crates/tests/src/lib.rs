//! Integration Tests for the Gateway Core
//!
//! This crate contains various test modules:
//!
//! - `fork_choice_tests`: chain head and block markers merged by the chain supervisor
//! - `strategy_tests`: upstream selection, matchers and the no-repeat guarantee
//! - `cache_policy_tests`: policy matching, store rules and multi-policy lookups
//! - `resilience_tests`: retry budgets and parallel hedging on plain attempts
//! - `flow_tests`: batches through a built runtime with unary, local and error paths
//! - `processor_tests`: sticky routing, integrity re-queries and subscriptions end to end
//! - `runtime_tests`: builder validation, config loading and shutdown
//! - `mock_infrastructure`: reusable mock upstreams, cache connectors and fixtures
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --package tests
//! ```
//!
//! Everything runs in-process against [`mock_infrastructure::MockUpstream`]; no network or
//! external services are needed.

#[cfg(test)]
mod fork_choice_tests;

#[cfg(test)]
mod strategy_tests;

#[cfg(test)]
mod cache_policy_tests;

#[cfg(test)]
mod resilience_tests;


#[cfg(test)]
mod processor_tests;

#[cfg(test)]
mod runtime_tests;

/// Mock infrastructure for testing
pub mod mock_infrastructure;
