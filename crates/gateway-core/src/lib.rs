//! # Gateway Core
//!
//! Request orchestration core of a multi-chain JSON-RPC gateway.
//!
//! - **[`chain`]**: per-chain supervisors merging upstream state into one chain view
//!   (fork-choice head, finalized/safe markers, method set, status).
//!
//! - **[`upstream`]**: the [`Upstream`](upstream::Upstream) transport interface, matchers,
//!   selection strategies (round-robin and rating-ordered), dimension rating and rate budgets.
//!
//! - **[`resilience`]**: composable retry and parallel-hedge policies around an attempt.
//!
//! - **[`cache`]**: cache policies bound to connectors, and the racing cache processor.
//!
//! - **[`flow`]**: request classification, the processor family and batch execution.
//!
//! - **[`runtime`]**: wiring everything from [`config::AppConfig`] with shared shutdown.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────── ExecutionFlow ─────────────────────────────┐
//! │ classify ──► Local | Subscription | Sticky | Integrity | Unary          │
//! │                                     │          │          │             │
//! │                                     └──────────┴──► CacheProcessor      │
//! │                                                     │ miss              │
//! │                                                     ▼                   │
//! │                                    Executor[ RetryPolicy[ HedgePolicy ]]│
//! │                                                     │                   │
//! │                                     UpstreamStrategy + Matchers         │
//! │                                                     │                   │
//! │                         ChainSupervisor snapshot ◄──┘                   │
//! └─────────────────────────────────────┬───────────────────────────────────┘
//!                                       ▼
//!                               Upstream transports
//! ```
//!
//! Transports, process bootstrap and the HTTP/WebSocket surfaces live outside this crate.

pub mod cache;
pub mod chain;
pub mod config;
pub mod flow;
pub mod logging;
pub mod metrics;
pub mod resilience;
pub mod runtime;
pub mod types;
pub mod upstream;
pub mod utils;
