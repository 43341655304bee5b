//! Component container of a running gateway core.

use crate::{
    cache::CacheProcessor,
    chain::ChainRegistry,
    flow::{ExecutionFlow, FlowContext, SubscriptionRegistry},
    metrics::ExecutionStats,
    upstream::{DimensionRating, DimensionTracker},
};
use std::sync::Arc;

/// Every initialized component, shared behind `Arc`s.
#[derive(Clone)]
pub struct GatewayComponents {
    registry: Arc<ChainRegistry>,
    cache: Arc<CacheProcessor>,
    tracker: Arc<DimensionTracker>,
    rating: Option<Arc<DimensionRating>>,
    flow: ExecutionFlow,
}

impl GatewayComponents {
    #[must_use]
    pub(super) fn new(
        registry: Arc<ChainRegistry>,
        cache: Arc<CacheProcessor>,
        tracker: Arc<DimensionTracker>,
        rating: Option<Arc<DimensionRating>>,
        flow: ExecutionFlow,
    ) -> Self {
        Self { registry, cache, tracker, rating, flow }
    }

    /// Chain supervisors and upstream handles.
    #[must_use]
    pub fn registry(&self) -> &Arc<ChainRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<CacheProcessor> {
        &self.cache
    }

    #[must_use]
    pub fn tracker(&self) -> &Arc<DimensionTracker> {
        &self.tracker
    }

    /// The rating, present when a chain uses the rating strategy.
    #[must_use]
    pub fn rating(&self) -> Option<&Arc<DimensionRating>> {
        self.rating.as_ref()
    }

    #[must_use]
    pub fn flow(&self) -> &ExecutionFlow {
        &self.flow
    }

    #[must_use]
    pub fn context(&self) -> &Arc<FlowContext> {
        self.flow.context()
    }

    #[must_use]
    pub fn subscriptions(&self) -> &Arc<SubscriptionRegistry> {
        &self.flow.context().subscriptions
    }

    #[must_use]
    pub fn stats(&self) -> &Arc<ExecutionStats> {
        &self.flow.context().stats
    }
}
