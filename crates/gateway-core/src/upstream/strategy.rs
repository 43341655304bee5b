//! Upstream selection strategies.
//!
//! A strategy instance lives for one request and hands out a different upstream on every
//! call, so retries and hedges never hit the same upstream twice:
//!
//! ```text
//! select_upstream()
//!   │
//!   ├─ candidate order (rotation or rating)
//!   ├─ skip ids already handed out
//!   ├─ MultiMatcher ──► Success ──► claim id ──► Ok(id)
//!   │                └► failure ──► remember most specific failure
//!   └─ exhausted ──► NotSupportedMethod if a method failure was seen,
//!                    NoAvailableUpstreams otherwise
//! ```

use super::{
    errors::UpstreamError,
    matcher::{
        CapabilityMatcher, MatchResponse, Matcher, MethodMatcher, MultiMatcher, RateLimitMatcher,
        StatusMatcher, UpstreamIndexMatcher,
    },
    rate_budget::RateBudget,
    rating::RatingRegistry,
};
use crate::chain::{state::Capability, supervisor::ChainSupervisor};
use dashmap::DashSet;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::trace;

/// Hands out upstreams for one request.
pub trait UpstreamStrategy: Send + Sync {
    /// Next upstream that satisfies the request, never one returned before.
    fn select_upstream(&self) -> Result<Arc<str>, UpstreamError>;

    /// Upstreams that would still be handed out right now. Claims nothing.
    fn remaining(&self) -> usize;
}

/// Strategy chosen per chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// Round-robin over all upstreams.
    #[default]
    Base,
    /// Best-rated upstreams first, then the rest.
    Rating,
}

/// Selection bookkeeping shared by all strategies.
struct Selection {
    supervisor: Arc<ChainSupervisor>,
    matcher: MultiMatcher,
    selected: DashSet<Arc<str>>,
    worst: Mutex<Option<MatchResponse>>,
}

impl Selection {
    fn new(supervisor: Arc<ChainSupervisor>, matcher: MultiMatcher) -> Self {
        Self { supervisor, matcher, selected: DashSet::new(), worst: Mutex::new(None) }
    }

    fn note(&self, response: MatchResponse) {
        let mut worst = self.worst.lock();
        *worst = Some(match worst.take() {
            Some(current) => current.worst(response),
            None => response,
        });
    }

    fn select_from<'a>(&self, candidates: impl Iterator<Item = &'a Arc<str>>) -> Result<Arc<str>, UpstreamError> {
        for id in candidates {
            if self.selected.contains(id) {
                continue;
            }
            let response = match self.supervisor.upstream_state(id) {
                Some(state) => self.matcher.matches(id, &state),
                None => MatchResponse::Availability,
            };
            if !response.is_success() {
                trace!(chain = %self.supervisor.chain(), upstream = %id, response = ?response, "upstream rejected");
                self.note(response);
                continue;
            }
            // concurrent hedges race for the same candidate; only one claims it
            if self.selected.insert(Arc::clone(id)) {
                self.matcher.on_selected(id);
                return Ok(Arc::clone(id));
            }
        }

        Err(self.worst.lock().clone().map_or(UpstreamError::NoAvailableUpstreams, MatchResponse::into_error))
    }

    fn count_from<'a>(&self, candidates: impl Iterator<Item = &'a Arc<str>>) -> usize {
        candidates
            .filter(|id| !self.selected.contains(*id))
            .filter(|id| {
                self.supervisor.upstream_state(id).is_some_and(|state| self.matcher.matches(id, &state).is_success())
            })
            .count()
    }
}

/// Round-robin strategy starting at the supervisor's rotating offset.
pub struct BaseStrategy {
    selection: Selection,
    start: usize,
}

impl BaseStrategy {
    #[must_use]
    pub fn new(supervisor: Arc<ChainSupervisor>, matcher: MultiMatcher) -> Self {
        let start = supervisor.next_rotation();
        Self { selection: Selection::new(supervisor, matcher), start }
    }
}

impl UpstreamStrategy for BaseStrategy {
    fn select_upstream(&self) -> Result<Arc<str>, UpstreamError> {
        let ids = self.selection.supervisor.upstream_ids();
        if ids.is_empty() {
            return Err(UpstreamError::NoAvailableUpstreams);
        }
        let offset = self.start % ids.len();
        self.selection.select_from(ids.iter().cycle().skip(offset).take(ids.len()))
    }

    fn remaining(&self) -> usize {
        self.selection.count_from(self.selection.supervisor.upstream_ids().iter())
    }
}

/// Rating-ordered strategy. Unrated upstreams follow the rated ones in round-robin order.
pub struct RatingStrategy {
    selection: Selection,
    rating: Arc<dyn RatingRegistry>,
    method: String,
    start: usize,
}

impl RatingStrategy {
    #[must_use]
    pub fn new(
        supervisor: Arc<ChainSupervisor>,
        matcher: MultiMatcher,
        rating: Arc<dyn RatingRegistry>,
        method: impl Into<String>,
    ) -> Self {
        let start = supervisor.next_rotation();
        Self { selection: Selection::new(supervisor, matcher), rating, method: method.into(), start }
    }

    fn candidates(&self) -> Vec<Arc<str>> {
        let supervisor = &self.selection.supervisor;
        let mut order = self.rating.sorted_upstreams(supervisor.chain(), &self.method);
        let known = supervisor.upstream_ids();

        let mut unrated: Vec<Arc<str>> = known.iter().filter(|id| !order.contains(id)).cloned().collect();
        if !unrated.is_empty() {
            let offset = self.start % unrated.len();
            unrated.rotate_left(offset);
        }
        order.extend(unrated);
        order
    }
}

impl UpstreamStrategy for RatingStrategy {
    fn select_upstream(&self) -> Result<Arc<str>, UpstreamError> {
        let candidates = self.candidates();
        if candidates.is_empty() {
            return Err(UpstreamError::NoAvailableUpstreams);
        }
        self.selection.select_from(candidates.iter())
    }

    fn remaining(&self) -> usize {
        self.selection.count_from(self.selection.supervisor.upstream_ids().iter())
    }
}

/// What a request needs from its upstream.
#[derive(Debug, Clone, Default)]
pub struct SelectionRequest {
    pub method: String,
    /// Requires the subscription capability.
    pub subscription: bool,
    /// Pins the request to one upstream index.
    pub upstream_index: Option<String>,
}

impl SelectionRequest {
    #[must_use]
    pub fn new(method: impl Into<String>) -> Self {
        Self { method: method.into(), ..Self::default() }
    }
}

/// Builds per-request strategies.
pub struct StrategyFactory {
    rating: Option<Arc<dyn RatingRegistry>>,
    budget: Arc<RateBudget>,
}

impl StrategyFactory {
    #[must_use]
    pub fn new(rating: Option<Arc<dyn RatingRegistry>>, budget: Arc<RateBudget>) -> Self {
        Self { rating, budget }
    }

    /// Matcher set for `request`.
    #[must_use]
    pub fn matcher_for(&self, request: &SelectionRequest) -> MultiMatcher {
        let mut matcher = MultiMatcher::new().with(StatusMatcher).with(MethodMatcher::new(&request.method));
        if request.subscription {
            matcher.push(Box::new(CapabilityMatcher::new(Capability::Ws)));
        }
        if let Some(index) = &request.upstream_index {
            matcher.push(Box::new(UpstreamIndexMatcher::new(index.as_str())));
        }
        matcher.push(Box::new(RateLimitMatcher::new(Arc::clone(&self.budget))));
        matcher
    }

    /// Creates a fresh strategy for one request.
    #[must_use]
    pub fn create(
        &self,
        kind: StrategyKind,
        supervisor: Arc<ChainSupervisor>,
        request: &SelectionRequest,
    ) -> Arc<dyn UpstreamStrategy> {
        let matcher = self.matcher_for(request);
        match (kind, &self.rating) {
            (StrategyKind::Rating, Some(rating)) => {
                Arc::new(RatingStrategy::new(supervisor, matcher, Arc::clone(rating), request.method.as_str()))
            }
            _ => Arc::new(BaseStrategy::new(supervisor, matcher)),
        }
    }
}
