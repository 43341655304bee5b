//! Gateway predicates plugged into the generic retry and hedge policies.

use super::request::ResponseHolderWrapper;
use crate::{
    metrics::{ExecutionStats, GatewayMetrics},
    resilience::{Executor, HedgeConfig, HedgePolicy, RetryConfig, RetryEvent, RetryPolicy},
    upstream::{DimensionTracker, UpstreamError, UpstreamStrategy},
};
use std::sync::Arc;
use tracing::{debug, warn};

type Outcome = Result<ResponseHolderWrapper, UpstreamError>;

/// Retried outcomes: transport failures and JSON-RPC errors another upstream may not return.
#[must_use]
pub fn is_retryable(outcome: &Outcome) -> bool {
    match outcome {
        Ok(wrapper) => wrapper.rpc_category().is_some_and(|category| category.is_transient()),
        Err(error) => error.is_transient(),
    }
}

/// Hedge outcomes that end the race at once.
#[must_use]
pub fn is_final_success(outcome: &Outcome) -> bool {
    outcome.as_ref().is_ok_and(|wrapper| !wrapper.is_error())
}

/// Ranks hedge outcomes: success, JSON-RPC error, transport error, selection failure.
#[must_use]
pub fn outcome_quality(outcome: &Outcome) -> u8 {
    match outcome {
        Ok(wrapper) if !wrapper.is_error() => 0,
        Ok(_) => 1,
        Err(error) if error.is_selection_failure() => 3,
        Err(_) => 2,
    }
}

pub fn retry_policy(
    config: &RetryConfig,
    chain: &Arc<str>,
    method: &str,
    stats: &Arc<ExecutionStats>,
) -> RetryPolicy<ResponseHolderWrapper, UpstreamError> {
    let chain = Arc::clone(chain);
    let method: Arc<str> = Arc::from(method);
    let stats = Arc::clone(stats);

    RetryPolicy::new(config.clone())
        .handle_if(is_retryable)
        .abort_if(|outcome: &Outcome| outcome.as_ref().is_err_and(UpstreamError::is_cancellation))
        .return_previous_on(UpstreamError::is_selection_failure)
        .on_retry(move |event: RetryEvent<'_, ResponseHolderWrapper, UpstreamError>| {
            let (upstream, error) = match event.outcome {
                Ok(wrapper) => (
                    Some(Arc::clone(&wrapper.upstream_id)),
                    wrapper.response.error.as_ref().map(|e| e.message.clone()).unwrap_or_default(),
                ),
                Err(error) => (None, error.to_string()),
            };
            warn!(
                chain = %chain,
                method = %method,
                upstream = ?upstream,
                attempt = event.attempts,
                delay_ms = u64::try_from(event.delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "retrying request"
            );
            GatewayMetrics::record_retry(&chain, &method, event.attempts);
            stats.record_retry();
        })
}

/// Selection failures mean a hedge found no upstream; they never beat a running branch.
#[must_use]
pub fn is_selection_failure(outcome: &Outcome) -> bool {
    outcome.as_ref().is_err_and(UpstreamError::is_selection_failure)
}

/// Hedges are capped by the upstreams the request's strategy can still hand out.
pub fn hedge_policy(
    config: &HedgeConfig,
    chain: &Arc<str>,
    method: &str,
    tracker: &Arc<DimensionTracker>,
    stats: &Arc<ExecutionStats>,
    strategy: &Arc<dyn UpstreamStrategy>,
) -> HedgePolicy<ResponseHolderWrapper, UpstreamError> {
    let strategy = Arc::clone(strategy);
    let delay_config = config.clone();
    let delay_chain = Arc::clone(chain);
    let delay_method: Arc<str> = Arc::from(method);
    let tracker = Arc::clone(tracker);

    let hedge_chain = Arc::clone(chain);
    let hedge_method: Arc<str> = Arc::from(method);
    let stats = Arc::clone(stats);

    HedgePolicy::new(config.delay_for(None), config.max_hedges)
        .with_delay_source(move || {
            let observed =
                tracker.method_quantile(&delay_chain, &delay_method, delay_config.latency_quantile);
            delay_config.delay_for(observed)
        })
        .with_hedge_limit(move || u32::try_from(strategy.remaining()).unwrap_or(u32::MAX))
        .cancel_if(is_final_success)
        .defer_if(is_selection_failure)
        .result_quality(outcome_quality)
        .on_hedge(move |hedges: u32| {
            debug!(chain = %hedge_chain, method = %hedge_method, hedges, "hedges launched");
            GatewayMetrics::record_hedge(&hedge_chain, &hedge_method);
            stats.record_hedge();
        })
}

/// Retry outermost, hedging inside each retry attempt when enabled.
#[must_use]
pub fn request_executor(
    retry: &RetryConfig,
    hedge: &HedgeConfig,
    chain: &Arc<str>,
    method: &str,
    tracker: &Arc<DimensionTracker>,
    stats: &Arc<ExecutionStats>,
    strategy: &Arc<dyn UpstreamStrategy>,
) -> Executor<ResponseHolderWrapper, UpstreamError> {
    let executor = Executor::<ResponseHolderWrapper, UpstreamError>::new()
        .with(Arc::new(retry_policy(retry, chain, method, stats)));
    if hedge.enabled && hedge.max_hedges > 0 {
        executor.with(Arc::new(hedge_policy(hedge, chain, method, tracker, stats, strategy)))
    } else {
        executor
    }
}
