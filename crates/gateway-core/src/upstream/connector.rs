//! Interface to one backing node.
//!
//! Transports (HTTP, WebSocket, gRPC) implement [`Upstream`] outside the core. Every call
//! receives a [`CancellationToken`]; a losing hedge branch or an expired request cancels
//! it and the implementation is expected to return promptly.

use crate::{
    types::{JsonRpcRequest, JsonRpcResponse},
    upstream::errors::UpstreamError,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Transport behind an upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorKind {
    Http,
    Ws,
    Grpc,
}

/// Live subscription opened on an upstream.
///
/// The first message is the subscription id returned by the upstream; every later
/// message is an event payload. The stream ends when the upstream closes it or the
/// receiver is dropped.
#[derive(Debug)]
pub struct UpstreamSubscription {
    pub events: mpsc::Receiver<Result<serde_json::Value, UpstreamError>>,
}

/// A backing node serving one chain.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Unique upstream id.
    fn id(&self) -> &Arc<str>;

    /// Chain served by this upstream.
    fn chain(&self) -> &str;

    fn connector_kind(&self) -> ConnectorKind;

    /// Sends a unary request.
    async fn send_request(
        &self,
        request: &JsonRpcRequest,
        cancel: &CancellationToken,
    ) -> Result<JsonRpcResponse, UpstreamError>;

    /// Opens a subscription. Upstreams without a persistent connection reject it.
    async fn subscribe(
        &self,
        request: &JsonRpcRequest,
        _cancel: &CancellationToken,
    ) -> Result<UpstreamSubscription, UpstreamError> {
        Err(UpstreamError::NotSupportedMethod(request.method.clone()))
    }
}
