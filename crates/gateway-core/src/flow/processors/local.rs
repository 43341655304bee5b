//! Methods answered by the gateway itself.

use crate::{
    flow::{
        context::FlowContext,
        request::{ProcessedResponse, RequestHolder, ResponseHolderWrapper, UnaryResponse, LOCAL_UPSTREAM},
    },
    types::{CacheStatus, JsonRpcResponse},
    upstream::UpstreamError,
    utils::hex_quantity,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct LocalRequestProcessor {
    ctx: Arc<FlowContext>,
}

impl LocalRequestProcessor {
    #[must_use]
    pub fn new(ctx: Arc<FlowContext>) -> Self {
        Self { ctx }
    }

    pub fn process(&self, holder: &RequestHolder) -> ProcessedResponse {
        let outcome = self.answer(holder).map(|result| ResponseHolderWrapper {
            upstream_id: Arc::from(LOCAL_UPSTREAM),
            request_id: Arc::clone(&holder.request_id),
            response: JsonRpcResponse::success(result, Arc::clone(&holder.request.id)),
        });
        ProcessedResponse::Unary(UnaryResponse { outcome, results: Arc::from(Vec::new()), cache_status: CacheStatus::Miss })
    }

    fn answer(&self, holder: &RequestHolder) -> Result<Value, UpstreamError> {
        let spec = self.ctx.methods.method(holder.method());
        if spec.is_some_and(|spec| spec.unsubscribe) {
            let Some(subscription_id) = holder.request.param(0).and_then(Value::as_str) else {
                return Err(UpstreamError::InvalidRequest(format!("{} expects a subscription id", holder.method())));
            };
            let cancelled = self.ctx.subscriptions.cancel(subscription_id);
            debug!(subscription = %subscription_id, cancelled, "unsubscribe");
            return Ok(Value::Bool(cancelled));
        }

        let config = self
            .ctx
            .chain_config(&holder.chain)
            .ok_or_else(|| UpstreamError::UnknownChain(holder.chain.to_string()))?;
        match holder.method() {
            "eth_chainId" => Ok(Value::String(hex_quantity(config.chain_id))),
            "net_version" => Ok(Value::String(config.chain_id.to_string())),
            method => Err(UpstreamError::NotSupportedMethod(method.to_string())),
        }
    }
}
