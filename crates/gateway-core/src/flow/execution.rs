//! Batch execution.
//!
//! ```text
//! execute(chain, [req, req, ...])
//!   └─ one task per request
//!        classify ──► RequestProcessors ──► hooks ──► stats/metrics ──► FlowResponse(s)
//!        (bounded by the request timeout)
//! ```
//!
//! Responses arrive in completion order, not request order; callers correlate by id.

use super::{
    context::FlowContext,
    hooks::ResultHook,
    methods::RequestKind,
    processors::RequestProcessors,
    request::{FlowResponse, ProcessedResponse, RequestHolder, SubscriptionResponse, UnaryResponse},
};
use crate::{
    metrics::GatewayMetrics,
    types::{CacheStatus, JsonRpcRequest, JsonRpcResponse},
    upstream::UpstreamError,
};
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tokio::{sync::mpsc, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Runs inbound requests through the processors.
#[derive(Clone)]
pub struct ExecutionFlow {
    ctx: Arc<FlowContext>,
    processors: RequestProcessors,
    hooks: Arc<[Arc<dyn ResultHook>]>,
    request_timeout: Duration,
}

impl ExecutionFlow {
    #[must_use]
    pub fn new(ctx: Arc<FlowContext>, request_timeout: Duration) -> Self {
        let processors = RequestProcessors::new(&ctx);
        Self { ctx, processors, hooks: Arc::from(Vec::new()), request_timeout }
    }

    #[must_use]
    pub fn with_hooks(mut self, hooks: Vec<Arc<dyn ResultHook>>) -> Self {
        self.hooks = Arc::from(hooks);
        self
    }

    #[must_use]
    pub fn context(&self) -> &Arc<FlowContext> {
        &self.ctx
    }

    /// Starts every request and returns the channel their responses arrive on.
    ///
    /// The channel closes once every unary request has answered and every subscription
    /// has ended. Cancelling `cancel` stops in-flight requests and open subscriptions.
    #[must_use]
    pub fn execute(
        &self,
        chain: &str,
        requests: Vec<JsonRpcRequest>,
        cancel: &CancellationToken,
    ) -> mpsc::UnboundedReceiver<FlowResponse> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let chain: Arc<str> = Arc::from(chain);

        for request in requests {
            let flow = self.clone();
            let holder = RequestHolder::new(Arc::clone(&chain), request);
            let sender = sender.clone();
            let cancel = cancel.child_token();
            tokio::spawn(async move { flow.run(holder, sender, cancel).await });
        }
        receiver
    }

    async fn run(&self, holder: RequestHolder, sender: mpsc::UnboundedSender<FlowResponse>, cancel: CancellationToken) {
        let spec = self.ctx.methods.method(holder.method());
        let integrity = self.ctx.chain_config(&holder.chain).is_some_and(|config| config.integrity);
        let kind = RequestKind::classify(spec, integrity);
        debug!(
            request_id = %holder.request_id,
            chain = %holder.chain,
            method = %holder.method(),
            kind = kind.as_str(),
            "processing request"
        );

        let started = Instant::now();
        let processed =
            match tokio::time::timeout(self.request_timeout, self.processors.process(kind, &holder, &cancel)).await {
                Ok(processed) => processed,
                Err(_) => {
                    // read before cancelling so unanswered attempts are still in flight
                    let attempts = holder.attempts.timed_out();
                    cancel.cancel();
                    self.ctx.stats.record_timeout();
                    warn!(
                        request_id = %holder.request_id,
                        chain = %holder.chain,
                        method = %holder.method(),
                        timeout_ms = u64::try_from(self.request_timeout.as_millis()).unwrap_or(u64::MAX),
                        "request timed out"
                    );
                    ProcessedResponse::Unary(UnaryResponse {
                        outcome: Err(UpstreamError::RequestTimeout),
                        results: attempts,
                        cache_status: CacheStatus::Miss,
                    })
                }
            };

        for hook in self.hooks.iter() {
            hook.on_results(&holder, processed.results());
        }

        match processed {
            ProcessedResponse::Unary(unary) => {
                self.record(&holder, kind, &unary, started.elapsed());
                let _ = sender.send(Self::unary_response(&holder, unary));
            }
            ProcessedResponse::Subscription(subscription) => {
                self.ctx.stats.record_request(false);
                self.ctx.stats.record_subscription();
                GatewayMetrics::record_request(&holder.chain, holder.method(), started.elapsed(), None);
                Self::stream(&holder, subscription, &sender).await;
            }
        }
    }

    fn record(&self, holder: &RequestHolder, kind: RequestKind, unary: &UnaryResponse, elapsed: Duration) {
        let failed = match &unary.outcome {
            Ok(wrapper) => wrapper.is_error(),
            Err(_) => true,
        };
        self.ctx.stats.record_request(failed);
        if kind == RequestKind::Local {
            self.ctx.stats.record_local();
        }
        GatewayMetrics::record_request(&holder.chain, holder.method(), elapsed, unary.outcome.as_ref().err());
    }

    fn unary_response(holder: &RequestHolder, unary: UnaryResponse) -> FlowResponse {
        let id = Arc::clone(&holder.request.id);
        match unary.outcome {
            Ok(wrapper) => FlowResponse { id, upstream_id: Some(wrapper.upstream_id), response: wrapper.response },
            Err(error) => {
                debug!(request_id = %holder.request_id, code = error.code(), error = %error, "request failed");
                let response = JsonRpcResponse::from_error(error.to_json_rpc_error(), Arc::clone(&id));
                FlowResponse { id, upstream_id: None, response }
            }
        }
    }

    /// Sends the subscription id, then every notification until the relay ends or the
    /// receiver goes away.
    async fn stream(
        holder: &RequestHolder,
        mut subscription: SubscriptionResponse,
        sender: &mpsc::UnboundedSender<FlowResponse>,
    ) {
        let id = Arc::clone(&holder.request.id);
        let upstream_id = Some(Arc::clone(&subscription.upstream_id));
        let opened = JsonRpcResponse::success(Value::String(subscription.subscription_id.clone()), Arc::clone(&id));
        if sender.send(FlowResponse { id: Arc::clone(&id), upstream_id: upstream_id.clone(), response: opened }).is_err()
        {
            return;
        }

        while let Some(response) = subscription.events.recv().await {
            let message = FlowResponse { id: Arc::clone(&id), upstream_id: upstream_id.clone(), response };
            if sender.send(message).is_err() {
                debug!(subscription = %subscription.subscription_id, "flow receiver dropped");
                return;
            }
        }
    }
}
