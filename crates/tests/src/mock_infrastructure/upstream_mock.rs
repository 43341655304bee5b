//! Scripted upstream.

use async_trait::async_trait;
use gateway_core::{
    types::{JsonRpcRequest, JsonRpcResponse},
    upstream::{ConnectorKind, Upstream, UpstreamError, UpstreamSubscription},
};
use parking_lot::Mutex;
use serde_json::Value;
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};
use tokio::{sync::mpsc, time::Instant};
use tokio_util::sync::CancellationToken;

/// One scripted answer.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Successful response carrying `result`.
    Result(Value),
    /// JSON-RPC error body returned by the node.
    RpcError(i32, String),
    /// Transport failure.
    Transport(UpstreamError),
    /// Answers after a delay; cancellation ends the wait early.
    Delayed(Duration, Box<MockReply>),
}

impl MockReply {
    #[must_use]
    pub fn result(value: Value) -> Self {
        Self::Result(value)
    }

    #[must_use]
    pub fn rpc_error(code: i32, message: &str) -> Self {
        Self::RpcError(code, message.to_string())
    }

    #[must_use]
    pub fn after(self, delay: Duration) -> Self {
        Self::Delayed(delay, Box::new(self))
    }
}

/// A call seen by a [`MockUpstream`].
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub request: JsonRpcRequest,
    pub started: Instant,
}

struct ScriptedSubscription {
    id: String,
    events: Vec<Value>,
    keep_open: bool,
}

/// Upstream answering from per-method reply queues.
///
/// Replies are consumed in order and the last one repeats. Methods without a script
/// answer with a `-32601` error body.
pub struct MockUpstream {
    id: Arc<str>,
    chain: String,
    kind: ConnectorKind,
    replies: Mutex<HashMap<String, VecDeque<MockReply>>>,
    subscriptions: Mutex<VecDeque<ScriptedSubscription>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockUpstream {
    #[must_use]
    pub fn new(id: &str, chain: &str) -> Self {
        Self {
            id: Arc::from(id),
            chain: chain.to_string(),
            kind: ConnectorKind::Ws,
            replies: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn with_kind(mut self, kind: ConnectorKind) -> Self {
        self.kind = kind;
        self
    }

    /// Queues `reply` for `method`.
    pub fn respond(&self, method: &str, reply: MockReply) {
        self.replies.lock().entry(method.to_string()).or_default().push_back(reply);
    }

    /// Queues a subscription: its id first, then `events`. With `keep_open` the stream
    /// stays open until the subscription is cancelled.
    pub fn subscription(&self, id: &str, events: Vec<Value>, keep_open: bool) {
        self.subscriptions.lock().push_back(ScriptedSubscription { id: id.to_string(), events, keep_open });
    }

    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Calls made for `method`.
    #[must_use]
    pub fn calls_for(&self, method: &str) -> usize {
        self.calls.lock().iter().filter(|call| call.request.method == method).count()
    }

    fn record(&self, request: &JsonRpcRequest) {
        self.calls.lock().push(RecordedCall { request: request.clone(), started: Instant::now() });
    }

    fn next_reply(&self, method: &str) -> MockReply {
        let mut replies = self.replies.lock();
        match replies.get_mut(method) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) if !queue.is_empty() => queue[0].clone(),
            _ => MockReply::rpc_error(-32601, "the method does not exist/is not available"),
        }
    }
}

#[async_trait]
impl Upstream for MockUpstream {
    fn id(&self) -> &Arc<str> {
        &self.id
    }

    fn chain(&self) -> &str {
        &self.chain
    }

    fn connector_kind(&self) -> ConnectorKind {
        self.kind
    }

    async fn send_request(
        &self,
        request: &JsonRpcRequest,
        cancel: &CancellationToken,
    ) -> Result<JsonRpcResponse, UpstreamError> {
        self.record(request);
        let mut reply = self.next_reply(&request.method);
        loop {
            match reply {
                MockReply::Result(value) => return Ok(JsonRpcResponse::success(value, Arc::clone(&request.id))),
                MockReply::RpcError(code, message) => {
                    return Ok(JsonRpcResponse::error(code, message, Arc::clone(&request.id)))
                }
                MockReply::Transport(error) => return Err(error),
                MockReply::Delayed(delay, inner) => {
                    tokio::select! {
                        () = cancel.cancelled() => return Err(UpstreamError::Cancelled),
                        () = tokio::time::sleep(delay) => reply = *inner,
                    }
                }
            }
        }
    }

    async fn subscribe(
        &self,
        request: &JsonRpcRequest,
        cancel: &CancellationToken,
    ) -> Result<UpstreamSubscription, UpstreamError> {
        self.record(request);
        if self.kind != ConnectorKind::Ws {
            return Err(UpstreamError::NotSupportedMethod(request.method.clone()));
        }
        let Some(script) = self.subscriptions.lock().pop_front() else {
            return Err(UpstreamError::ConnectionFailed("subscription rejected".to_string()));
        };

        let (tx, rx) = mpsc::channel(16);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tx.send(Ok(Value::String(script.id))).await.is_err() {
                return;
            }
            for event in script.events {
                if tx.send(Ok(event)).await.is_err() {
                    return;
                }
            }
            if script.keep_open {
                cancel.cancelled().await;
            }
        });
        Ok(UpstreamSubscription { events: rx })
    }
}
