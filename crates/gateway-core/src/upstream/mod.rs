//! Upstream handles and upstream selection.
//!
//! Upstreams themselves (connection management, health probing) live outside the core;
//! the core sees them through the [`Upstream`] trait and their published
//! [`UpstreamState`](crate::chain::UpstreamState) snapshots.
//!
//! # Selection
//!
//! Each request builds a fresh [`UpstreamStrategy`] from the [`StrategyFactory`]. The
//! strategy filters candidates through a [`MultiMatcher`] and orders them either
//! round-robin ([`BaseStrategy`]) or by the [`DimensionRating`] ([`RatingStrategy`]).
//!
//! ```text
//! StrategyFactory ──► MultiMatcher { Status, Method, [Ws], [UpstreamIndex], RateLimit }
//!        │
//!        └──► BaseStrategy | RatingStrategy ──► select_upstream() ──► upstream id
//! ```

pub mod connector;
pub mod errors;
pub mod latency;
pub mod matcher;
pub mod rate_budget;
pub mod rating;
pub mod strategy;

pub use connector::{ConnectorKind, Upstream, UpstreamSubscription};
pub use errors::{RpcErrorCategory, UpstreamError};
pub use matcher::{MatchResponse, Matcher, MultiMatcher};
pub use rate_budget::{RateBudget, RateLimitConfig};
pub use rating::{DimensionRating, DimensionTracker, RatingConfig, RatingRegistry};
pub use strategy::{
    BaseStrategy, RatingStrategy, SelectionRequest, StrategyFactory, StrategyKind, UpstreamStrategy,
};
