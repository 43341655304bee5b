//! Head and finality checks on block-height responses.
//!
//! ```text
//! unary response ──► reported height ──► supervisor.observe (always)
//!                          │
//!                 behind tracked marker?
//!                          │ yes
//!                          ▼
//!   upstreams further ahead, highest first ──► first response that is ahead wins
//!   (bounded by the internal timeout)
//! ```

use crate::{
    chain::{BlockData, BlockType, ChainSupervisor, ChainSupervisorState, ObservedBlock, UpstreamState},
    flow::{
        context::FlowContext,
        processors::unary::UnaryRequestProcessor,
        request::{
            AttemptOutcome, ProcessedResponse, RequestHolder, RequestResult, ResponseHolderWrapper,
            UnaryResponse,
        },
    },
    metrics::GatewayMetrics,
    upstream::SelectionRequest,
    utils::{BlockParameter, BlockRef, BlockTag},
};
use serde_json::Value;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Which tracked marker a response reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    Head,
    Block(BlockType),
}

impl Marker {
    fn for_request(method: &str, block_param: Option<&Value>) -> Option<Self> {
        match method {
            "eth_blockNumber" => Some(Self::Head),
            "eth_getBlockByNumber" => match BlockParameter::parse_value(block_param?).ok()? {
                BlockRef::Tag(BlockTag::Latest) => Some(Self::Head),
                BlockRef::Tag(BlockTag::Finalized) => Some(Self::Block(BlockType::Finalized)),
                BlockRef::Tag(BlockTag::Safe) => Some(Self::Block(BlockType::Safe)),
                _ => None,
            },
            _ => None,
        }
    }

    fn reported(self, method: &str, result: &Value) -> Option<u64> {
        if method == "eth_blockNumber" {
            BlockParameter::from_json_value(result)
        } else {
            result.get("number").and_then(BlockParameter::from_json_value)
        }
    }

    fn tracked(self, state: &ChainSupervisorState) -> Option<u64> {
        match self {
            Self::Head => Some(state.head.height).filter(|height| *height > 0),
            Self::Block(block_type) => state.block_height(block_type),
        }
    }

    fn of_upstream(self, state: &UpstreamState) -> Option<u64> {
        match self {
            Self::Head => Some(state.head_data.height),
            Self::Block(block_type) => state.block_height(block_type),
        }
    }

    fn observed(self, height: u64) -> ObservedBlock {
        match self {
            Self::Head => ObservedBlock::Head(height),
            Self::Block(block_type) => ObservedBlock::Block(BlockData::new(height, block_type)),
        }
    }
}

/// Wraps unary processing with a lagging-response check.
#[derive(Clone)]
pub struct IntegrityRequestProcessor {
    ctx: Arc<FlowContext>,
    unary: UnaryRequestProcessor,
}

impl IntegrityRequestProcessor {
    #[must_use]
    pub fn new(ctx: Arc<FlowContext>, unary: UnaryRequestProcessor) -> Self {
        Self { ctx, unary }
    }

    pub async fn process(&self, holder: &RequestHolder, cancel: &CancellationToken) -> ProcessedResponse {
        let selection = SelectionRequest::new(holder.method());
        let response = self.unary.execute(holder, &holder.request, selection, cancel).await;
        ProcessedResponse::Unary(self.check(holder, response, cancel).await)
    }

    async fn check(&self, holder: &RequestHolder, response: UnaryResponse, cancel: &CancellationToken) -> UnaryResponse {
        let method = holder.method();
        let Some(marker) = Marker::for_request(method, holder.request.param(0)) else {
            return response;
        };
        let Ok(wrapper) = &response.outcome else {
            return response;
        };
        let Some(reported) = wrapper.result().and_then(|result| marker.reported(method, result)) else {
            return response;
        };
        let Some(supervisor) = self.ctx.registry.supervisor(&holder.chain) else {
            return response;
        };

        // the snapshot is taken before feeding back so a lagging answer is compared
        // against what the chain already knew
        let tracked = marker.tracked(&supervisor.chain_state());
        self.observe(&supervisor, &wrapper.upstream_id, marker, reported).await;

        let Some(tracked) = tracked.filter(|tracked| reported < *tracked) else {
            return response;
        };
        debug!(
            chain = %holder.chain,
            method = %method,
            upstream = %wrapper.upstream_id,
            reported,
            tracked,
            "response behind tracked marker"
        );

        let served = Arc::clone(&wrapper.upstream_id);
        let requery = self.requery(holder, &supervisor, &served, marker, reported, cancel);
        let (better, extra) = match tokio::time::timeout(self.ctx.internal_timeout, requery).await {
            Ok(found) => found,
            Err(_) => {
                warn!(chain = %holder.chain, method = %method, "integrity re-query timed out");
                (None, Vec::new())
            }
        };

        let mut results = response.results.to_vec();
        results.extend(extra);
        UnaryResponse {
            outcome: better.map_or(response.outcome, Ok),
            results: Arc::from(results),
            cache_status: response.cache_status,
        }
    }

    async fn observe(&self, supervisor: &ChainSupervisor, upstream_id: &Arc<str>, marker: Marker, height: u64) {
        if supervisor.observe(Arc::clone(upstream_id), marker.observed(height)).await.is_err() {
            debug!(chain = %supervisor.chain(), "supervisor stopped, observation dropped");
        }
    }

    /// Asks upstreams further ahead than `reported`, highest first.
    async fn requery(
        &self,
        holder: &RequestHolder,
        supervisor: &ChainSupervisor,
        served: &Arc<str>,
        marker: Marker,
        reported: u64,
        cancel: &CancellationToken,
    ) -> (Option<ResponseHolderWrapper>, Vec<RequestResult>) {
        let method = holder.method();
        let candidates = supervisor.sorted_upstream_ids(
            |id, state| {
                id != &**served &&
                    state.is_available() &&
                    state.has_method(method) &&
                    marker.of_upstream(state).is_some_and(|height| height > reported)
            },
            |a, b| marker.of_upstream(b).cmp(&marker.of_upstream(a)),
        );

        let mut results = Vec::new();
        for upstream_id in candidates {
            let Some(upstream) = self.ctx.registry.upstream(&holder.chain, &upstream_id) else {
                continue;
            };

            let ticket = holder.attempts.start(&upstream_id, true, 0);
            let started = Instant::now();
            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    holder.attempts.abandon(ticket);
                    return (None, results);
                }
                outcome = upstream.send_request(&holder.request, cancel) => outcome,
            };
            let duration = started.elapsed();
            let attempt = AttemptOutcome::of(&outcome);
            GatewayMetrics::record_upstream_call(&holder.chain, &upstream_id, duration, attempt.is_healthy());
            let result = RequestResult {
                upstream_id: Arc::clone(&upstream_id),
                outcome: attempt,
                duration,
                retried: true,
                hedge: 0,
            };
            holder.attempts.finish(ticket, result.clone());
            results.push(result);

            let Ok(mut response) = outcome else { continue };
            let Some(height) = response.result.as_ref().and_then(|result| marker.reported(method, result)) else {
                continue;
            };
            self.observe(supervisor, &upstream_id, marker, height).await;
            if height > reported {
                debug!(chain = %holder.chain, method = %method, upstream = %upstream_id, height, "re-query ahead");
                response.id = Arc::clone(&holder.request.id);
                let wrapper =
                    ResponseHolderWrapper { upstream_id, request_id: Arc::clone(&holder.request_id), response };
                return (Some(wrapper), results);
            }
        }
        (None, results)
    }
}
