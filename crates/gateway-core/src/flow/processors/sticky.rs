//! Pins filter-style resources to the upstream that created them.
//!
//! ```text
//! create:  eth_newFilter ──► upstream "a" ──► "0x1f" ──► client sees "0x1f" + index("a")
//! send:    eth_getFilterChanges("0x1f" + index("a"))
//!              └─ strip index ──► "0x1f" ──► only upstream with index("a")
//! ```

use crate::{
    chain::{upstream_index_for, UPSTREAM_INDEX_LEN},
    flow::{
        methods::StickyRole,
        processors::unary::UnaryRequestProcessor,
        request::{ProcessedResponse, RequestHolder, UnaryResponse},
    },
    upstream::{SelectionRequest, UpstreamError},
};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Clone)]
pub struct StickyRequestProcessor {
    unary: UnaryRequestProcessor,
}

impl StickyRequestProcessor {
    #[must_use]
    pub fn new(unary: UnaryRequestProcessor) -> Self {
        Self { unary }
    }

    pub async fn process(
        &self,
        holder: &RequestHolder,
        role: StickyRole,
        cancel: &CancellationToken,
    ) -> ProcessedResponse {
        let response = match role {
            StickyRole::Create => self.create(holder, cancel).await,
            StickyRole::Send => self.send(holder, cancel).await,
        };
        ProcessedResponse::Unary(response)
    }

    async fn create(&self, holder: &RequestHolder, cancel: &CancellationToken) -> UnaryResponse {
        let selection = SelectionRequest::new(holder.method());
        let mut response = self.unary.execute(holder, &holder.request, selection, cancel).await;

        if let Ok(wrapper) = &mut response.outcome {
            if let Some(Value::String(resource)) = wrapper.response.result.as_mut() {
                resource.push_str(&upstream_index_for(&wrapper.upstream_id));
                debug!(
                    request_id = %holder.request_id,
                    upstream = %wrapper.upstream_id,
                    resource = %resource,
                    "sticky resource created"
                );
            }
        }
        response
    }

    async fn send(&self, holder: &RequestHolder, cancel: &CancellationToken) -> UnaryResponse {
        let Some((resource, index)) = split_resource(holder.request.param(0)) else {
            return UnaryResponse::error(UpstreamError::InvalidRequest(format!(
                "{} expects a resource id created by this gateway",
                holder.method()
            )));
        };

        let request = holder.request.with_param(0, Value::String(resource));
        let selection =
            SelectionRequest { upstream_index: Some(index), ..SelectionRequest::new(holder.method()) };
        self.unary.execute(holder, &request, selection, cancel).await
    }
}

/// Splits a client-facing resource id into the upstream's id and the upstream index.
fn split_resource(param: Option<&Value>) -> Option<(String, String)> {
    let value = param?.as_str()?;
    if value.len() <= UPSTREAM_INDEX_LEN || !value.is_char_boundary(value.len() - UPSTREAM_INDEX_LEN) {
        return None;
    }
    let (resource, index) = value.split_at(value.len() - UPSTREAM_INDEX_LEN);
    Some((resource.to_string(), index.to_string()))
}
