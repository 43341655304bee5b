//! Predicates deciding whether an upstream may serve a request.
//!
//! Each matcher inspects one aspect of an [`UpstreamState`]. A [`MultiMatcher`] runs all of
//! them and reports the most specific failure, which becomes the error shown to the
//! caller when no upstream qualifies.

use crate::{
    chain::state::{Capability, UpstreamState},
    upstream::{errors::UpstreamError, rate_budget::RateBudget},
};
use std::sync::Arc;

/// Result of matching one upstream. Lower [`rank`](MatchResponse::rank) wins when aggregating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchResponse {
    Success,
    /// The upstream is unavailable or lacks a required capability.
    Availability,
    /// The upstream does not serve the method.
    Method(String),
    /// The upstream's request budget is spent.
    RateLimiter,
    /// The upstream is not the one a sticky request is pinned to.
    UpstreamIndex(String),
}

impl MatchResponse {
    /// Priority of the response; the lowest rank is the most specific failure.
    #[must_use]
    pub fn rank(&self) -> u8 {
        match self {
            Self::UpstreamIndex(_) => 0,
            Self::Method(_) => 1,
            Self::RateLimiter => 2,
            Self::Availability => 3,
            Self::Success => 4,
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Returns the more specific of two responses.
    #[must_use]
    pub fn worst(self, other: MatchResponse) -> MatchResponse {
        if other.rank() < self.rank() {
            other
        } else {
            self
        }
    }

    /// Error reported when this was the worst response observed.
    #[must_use]
    pub fn into_error(self) -> UpstreamError {
        match self {
            Self::Method(method) => UpstreamError::NotSupportedMethod(method),
            _ => UpstreamError::NoAvailableUpstreams,
        }
    }
}

/// Decides whether one upstream may serve the current request.
pub trait Matcher: Send + Sync {
    fn matches(&self, upstream_id: &str, state: &UpstreamState) -> MatchResponse;

    /// Called once the upstream has been selected.
    fn on_selected(&self, _upstream_id: &str) {}
}

/// Requires an available upstream.
pub struct StatusMatcher;

impl Matcher for StatusMatcher {
    fn matches(&self, _upstream_id: &str, state: &UpstreamState) -> MatchResponse {
        if state.is_available() {
            MatchResponse::Success
        } else {
            MatchResponse::Availability
        }
    }
}

/// Requires the method in the upstream's capability set.
pub struct MethodMatcher {
    method: String,
}

impl MethodMatcher {
    #[must_use]
    pub fn new(method: impl Into<String>) -> Self {
        Self { method: method.into() }
    }
}

impl Matcher for MethodMatcher {
    fn matches(&self, _upstream_id: &str, state: &UpstreamState) -> MatchResponse {
        if state.has_method(&self.method) {
            MatchResponse::Success
        } else {
            MatchResponse::Method(self.method.clone())
        }
    }
}

/// Requires an advertised capability, e.g. subscriptions.
pub struct CapabilityMatcher {
    capability: Capability,
}

impl CapabilityMatcher {
    #[must_use]
    pub fn new(capability: Capability) -> Self {
        Self { capability }
    }
}

impl Matcher for CapabilityMatcher {
    fn matches(&self, _upstream_id: &str, state: &UpstreamState) -> MatchResponse {
        if state.caps.contains(&self.capability) {
            MatchResponse::Success
        } else {
            MatchResponse::Availability
        }
    }
}

/// Pins a request to the upstream with the given index.
pub struct UpstreamIndexMatcher {
    index: String,
}

impl UpstreamIndexMatcher {
    #[must_use]
    pub fn new(index: impl Into<String>) -> Self {
        Self { index: index.into() }
    }
}

impl Matcher for UpstreamIndexMatcher {
    fn matches(&self, _upstream_id: &str, state: &UpstreamState) -> MatchResponse {
        if state.upstream_index == self.index {
            MatchResponse::Success
        } else {
            MatchResponse::UpstreamIndex(self.index.clone())
        }
    }
}

/// Requires request budget left on the upstream; consumes one token on selection.
pub struct RateLimitMatcher {
    budget: Arc<RateBudget>,
}

impl RateLimitMatcher {
    #[must_use]
    pub fn new(budget: Arc<RateBudget>) -> Self {
        Self { budget }
    }
}

impl Matcher for RateLimitMatcher {
    fn matches(&self, upstream_id: &str, _state: &UpstreamState) -> MatchResponse {
        if self.budget.has_capacity(upstream_id) {
            MatchResponse::Success
        } else {
            MatchResponse::RateLimiter
        }
    }

    fn on_selected(&self, upstream_id: &str) {
        self.budget.acquire(upstream_id);
    }
}

/// Runs every matcher and keeps the lowest-ranked failure.
#[derive(Default)]
pub struct MultiMatcher {
    matchers: Vec<Box<dyn Matcher>>,
}

impl MultiMatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, matcher: impl Matcher + 'static) -> Self {
        self.matchers.push(Box::new(matcher));
        self
    }

    pub fn push(&mut self, matcher: Box<dyn Matcher>) {
        self.matchers.push(matcher);
    }
}

impl Matcher for MultiMatcher {
    fn matches(&self, upstream_id: &str, state: &UpstreamState) -> MatchResponse {
        self.matchers.iter().fold(MatchResponse::Success, |worst, matcher| {
            worst.worst(matcher.matches(upstream_id, state))
        })
    }

    fn on_selected(&self, upstream_id: &str) {
        for matcher in &self.matchers {
            matcher.on_selected(upstream_id);
        }
    }
}
