//! Plain request/response processing.
//!
//! ```text
//! cache hit? ──yes──► response (upstream "cache")
//!     │ no
//!     ▼
//! Executor[ retry [ hedge [ select upstream → send ] ] ]
//!     │ success and cacheable
//!     ▼
//! background cache store
//! ```

use crate::{
    chain::BlockType,
    flow::{
        context::FlowContext,
        policies::request_executor,
        request::{
            AttemptOutcome, ProcessedResponse, RequestHolder, RequestResult, RequestResults,
            ResponseHolderWrapper, UnaryResponse, CACHE_UPSTREAM,
        },
    },
    metrics::GatewayMetrics,
    resilience::{attempt_fn, Attempt, AttemptContext},
    types::{CacheStatus, JsonRpcRequest, JsonRpcResponse},
    upstream::{SelectionRequest, UpstreamError, UpstreamStrategy},
};
use serde_json::Value;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Cache lookup, then upstream execution under the chain's retry and hedge policies.
#[derive(Clone)]
pub struct UnaryRequestProcessor {
    ctx: Arc<FlowContext>,
}

impl UnaryRequestProcessor {
    #[must_use]
    pub fn new(ctx: Arc<FlowContext>) -> Self {
        Self { ctx }
    }

    pub async fn process(&self, holder: &RequestHolder, cancel: &CancellationToken) -> ProcessedResponse {
        let selection = SelectionRequest::new(holder.method());
        ProcessedResponse::Unary(self.execute(holder, &holder.request, selection, cancel).await)
    }

    /// Runs `request` for `holder`, routed by `selection`.
    ///
    /// Sticky and integrity processing call this with rewritten requests or pinned
    /// selections.
    pub async fn execute(
        &self,
        holder: &RequestHolder,
        request: &JsonRpcRequest,
        selection: SelectionRequest,
        cancel: &CancellationToken,
    ) -> UnaryResponse {
        let (config, supervisor) = match self.ctx.resolve_chain(&holder.chain) {
            Ok(resolved) => resolved,
            Err(error) => return UnaryResponse::error(error),
        };
        let spec = self.ctx.methods.method(&request.method);
        let cacheable = spec.is_some_and(|spec| spec.cacheable);

        if cacheable {
            if let Some(result) = self.ctx.cache.receive(&holder.chain, request).await {
                self.ctx.stats.record_cache_hit();
                let response = JsonRpcResponse::success(result, Arc::clone(&request.id))
                    .with_cache_status(CacheStatus::Hit);
                return UnaryResponse {
                    outcome: Ok(ResponseHolderWrapper {
                        upstream_id: Arc::from(CACHE_UPSTREAM),
                        request_id: Arc::clone(&holder.request_id),
                        response,
                    }),
                    results: Arc::from(Vec::new()),
                    cache_status: CacheStatus::Hit,
                };
            }
        }

        let strategy = self.ctx.strategies.create(config.strategy, Arc::clone(&supervisor), &selection);
        let results = Arc::new(RequestResults::new());
        let executor = request_executor(
            &config.retry,
            &config.hedge,
            &holder.chain,
            &request.method,
            &self.ctx.tracker,
            &self.ctx.stats,
            &strategy,
        );
        let attempt = self.attempt(holder, request, strategy, Arc::clone(&results));

        let outcome = executor.execute(cancel.clone(), attempt).await.map(|mut wrapper| {
            wrapper.response = wrapper.response.with_cache_status(CacheStatus::Miss);
            wrapper
        });

        if let (Ok(wrapper), Some(spec)) = (&outcome, spec) {
            if spec.cacheable && !wrapper.is_error() {
                if let Some(result) = wrapper.result() {
                    let latest = Value::from("latest");
                    let block = spec.block_param.map(|index| request.param(index).unwrap_or(&latest));
                    let finalized = supervisor.chain_state().block_height(BlockType::Finalized);
                    if self.ctx.cache.store(&holder.chain, request, result, block, finalized).is_some() {
                        trace!(request_id = %holder.request_id, method = %request.method, "response scheduled for caching");
                    }
                }
            }
        }

        UnaryResponse { outcome, results: results.finish(), cache_status: CacheStatus::Miss }
    }

    fn attempt(
        &self,
        holder: &RequestHolder,
        request: &JsonRpcRequest,
        strategy: Arc<dyn UpstreamStrategy>,
        results: Arc<RequestResults>,
    ) -> Attempt<ResponseHolderWrapper, UpstreamError> {
        let registry = Arc::clone(&self.ctx.registry);
        let chain = Arc::clone(&holder.chain);
        let request_id = Arc::clone(&holder.request_id);
        let journal = Arc::clone(&holder.attempts);
        let request = Arc::new(request.clone());

        attempt_fn(move |ctx: AttemptContext| {
            let registry = Arc::clone(&registry);
            let chain = Arc::clone(&chain);
            let request_id = Arc::clone(&request_id);
            let journal = Arc::clone(&journal);
            let request = Arc::clone(&request);
            let strategy = Arc::clone(&strategy);
            let results = Arc::clone(&results);

            async move {
                let upstream_id = strategy.select_upstream()?;
                let upstream = registry
                    .upstream(&chain, &upstream_id)
                    .ok_or_else(|| UpstreamError::UnknownUpstream(upstream_id.to_string()))?;

                let retried = ctx.attempt > 0;
                let ticket = journal.start(&upstream_id, retried, ctx.hedge);
                let started = Instant::now();
                let outcome = tokio::select! {
                    biased;
                    () = ctx.cancel.cancelled() => Err(UpstreamError::Cancelled),
                    outcome = upstream.send_request(&request, &ctx.cancel) => outcome,
                };
                let duration = started.elapsed();

                if matches!(outcome, Err(UpstreamError::Cancelled)) {
                    trace!(upstream = %upstream_id, hedge = ctx.hedge, "attempt cancelled");
                    journal.abandon(ticket);
                    return Err(UpstreamError::Cancelled);
                }

                let attempt_outcome = AttemptOutcome::of(&outcome);
                GatewayMetrics::record_upstream_call(&chain, &upstream_id, duration, attempt_outcome.is_healthy());
                let result = RequestResult {
                    upstream_id: Arc::clone(&upstream_id),
                    outcome: attempt_outcome,
                    duration,
                    retried,
                    hedge: ctx.hedge,
                };
                journal.finish(ticket, result.clone());
                results.push(result);

                let mut response = match outcome {
                    Ok(response) => response,
                    Err(UpstreamError::RpcError(code, message)) => {
                        JsonRpcResponse::error(code, message, Arc::clone(&request.id))
                    }
                    Err(error) => {
                        debug!(
                            upstream = %upstream_id,
                            method = %request.method,
                            attempt = ctx.attempt,
                            hedge = ctx.hedge,
                            error = %error,
                            "upstream attempt failed"
                        );
                        return Err(error);
                    }
                };
                response.id = Arc::clone(&request.id);
                Ok(ResponseHolderWrapper { upstream_id, request_id, response })
            }
        })
    }
}
