//! Values moved between processors, hooks and the flow.

use crate::{
    resilience::PolicyError,
    types::{CacheStatus, JsonRpcRequest, JsonRpcResponse},
    upstream::{RpcErrorCategory, UpstreamError},
};
use ahash::AHashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{sync::mpsc, time::Instant};

/// Pseudo upstream id of responses served from cache.
pub const CACHE_UPSTREAM: &str = "cache";

/// Pseudo upstream id of responses answered by the gateway.
pub const LOCAL_UPSTREAM: &str = "local";

/// One inbound request with its routing context.
#[derive(Debug, Clone)]
pub struct RequestHolder {
    pub chain: Arc<str>,
    pub request: JsonRpcRequest,
    /// Gateway-internal id used in logs.
    pub request_id: Arc<str>,
    /// Every upstream attempt made for this request, including unfinished ones.
    pub attempts: Arc<AttemptJournal>,
}

impl RequestHolder {
    #[must_use]
    pub fn new(chain: impl Into<Arc<str>>, request: JsonRpcRequest) -> Self {
        Self {
            chain: chain.into(),
            request,
            request_id: Arc::from(uuid::Uuid::new_v4().to_string()),
            attempts: Arc::new(AttemptJournal::default()),
        }
    }

    #[must_use]
    pub fn method(&self) -> &str {
        &self.request.method
    }
}

/// A response together with the upstream that produced it.
///
/// JSON-RPC error bodies returned by an upstream are carried here too; only transport
/// and orchestration failures become [`UpstreamError`]s.
#[derive(Debug, Clone)]
pub struct ResponseHolderWrapper {
    pub upstream_id: Arc<str>,
    pub request_id: Arc<str>,
    pub response: JsonRpcResponse,
}

impl ResponseHolderWrapper {
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.response.is_error()
    }

    /// Category of the carried JSON-RPC error, if any.
    #[must_use]
    pub fn rpc_category(&self) -> Option<RpcErrorCategory> {
        self.response
            .error
            .as_ref()
            .map(|error| RpcErrorCategory::from_code_and_message(error.code, &error.message))
    }

    #[must_use]
    pub fn result(&self) -> Option<&Value> {
        self.response.result.as_ref()
    }
}

impl PolicyError<ResponseHolderWrapper> for UpstreamError {
    fn cancelled() -> Self {
        Self::Cancelled
    }

    fn is_cancelled(&self) -> bool {
        self.is_cancellation()
    }

    fn exceeded(attempts: u32, last: Result<ResponseHolderWrapper, Self>) -> Self {
        let last = match last {
            Err(error) => error,
            Ok(wrapper) => match wrapper.response.error {
                Some(error) => Self::from(error),
                None => Self::IncorrectResponseBody("response without error exhausted retries".to_string()),
            },
        };
        Self::RetriesExceeded { attempts, last: Box::new(last) }
    }
}

/// How one upstream attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    RpcError { code: i32, category: RpcErrorCategory },
    Failure(&'static str),
}

impl AttemptOutcome {
    #[must_use]
    pub fn of(outcome: &Result<JsonRpcResponse, UpstreamError>) -> Self {
        match outcome {
            Ok(response) => match &response.error {
                None => Self::Success,
                Some(error) => Self::RpcError {
                    code: error.code,
                    category: RpcErrorCategory::from_code_and_message(error.code, &error.message),
                },
            },
            Err(UpstreamError::RpcError(code, message)) => {
                Self::RpcError { code: *code, category: RpcErrorCategory::from_code_and_message(*code, message) }
            }
            Err(error) => Self::Failure(error.as_metric_str()),
        }
    }

    /// Whether the upstream served the request, even if the answer is an error the caller
    /// caused.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        match self {
            Self::Success => true,
            Self::RpcError { category, .. } => !category.is_transient(),
            Self::Failure(_) => false,
        }
    }
}

/// One upstream attempt of a logical request.
#[derive(Debug, Clone)]
pub struct RequestResult {
    pub upstream_id: Arc<str>,
    pub outcome: AttemptOutcome,
    pub duration: Duration,
    /// Made by a retry rather than the first attempt.
    pub retried: bool,
    /// Zero for the primary branch.
    pub hedge: u32,
}

/// Collects attempt results while branches run concurrently.
#[derive(Debug, Default)]
pub struct RequestResults {
    results: Mutex<Vec<RequestResult>>,
}

impl RequestResults {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, result: RequestResult) {
        self.results.lock().push(result);
    }

    /// Takes everything collected so far as an immutable slice.
    #[must_use]
    pub fn finish(&self) -> Arc<[RequestResult]> {
        Arc::from(std::mem::take(&mut *self.results.lock()))
    }
}

#[derive(Debug)]
struct InFlightAttempt {
    upstream_id: Arc<str>,
    started: Instant,
    retried: bool,
    hedge: u32,
}

/// Request-wide record of upstream attempts.
///
/// Processors report attempts here as they start and finish. When the request timeout
/// drops the processing future, [`AttemptJournal::timed_out`] still reports the finished
/// attempts and the ones that never answered.
#[derive(Debug, Default)]
pub struct AttemptJournal {
    next: AtomicU64,
    in_flight: Mutex<AHashMap<u64, InFlightAttempt>>,
    finished: Mutex<Vec<RequestResult>>,
}

impl AttemptJournal {
    /// Registers an attempt that is about to be sent; returns its ticket.
    pub fn start(&self, upstream_id: &Arc<str>, retried: bool, hedge: u32) -> u64 {
        let ticket = self.next.fetch_add(1, Ordering::Relaxed);
        let attempt = InFlightAttempt { upstream_id: Arc::clone(upstream_id), started: Instant::now(), retried, hedge };
        self.in_flight.lock().insert(ticket, attempt);
        ticket
    }

    pub fn finish(&self, ticket: u64, result: RequestResult) {
        self.in_flight.lock().remove(&ticket);
        self.finished.lock().push(result);
    }

    /// Forgets an attempt that was cancelled before it answered.
    pub fn abandon(&self, ticket: u64) {
        self.in_flight.lock().remove(&ticket);
    }

    /// Finished attempts plus one `request_timeout` failure per unanswered attempt.
    #[must_use]
    pub fn timed_out(&self) -> Arc<[RequestResult]> {
        let mut results = self.finished.lock().clone();
        let mut pending: Vec<(u64, RequestResult)> = self
            .in_flight
            .lock()
            .iter()
            .map(|(ticket, attempt)| {
                let result = RequestResult {
                    upstream_id: Arc::clone(&attempt.upstream_id),
                    outcome: AttemptOutcome::Failure(UpstreamError::RequestTimeout.as_metric_str()),
                    duration: attempt.started.elapsed(),
                    retried: attempt.retried,
                    hedge: attempt.hedge,
                };
                (*ticket, result)
            })
            .collect();
        pending.sort_unstable_by_key(|(ticket, _)| *ticket);
        results.extend(pending.into_iter().map(|(_, result)| result));
        Arc::from(results)
    }
}

/// Outcome of a unary processor.
#[derive(Debug, Clone)]
pub struct UnaryResponse {
    pub outcome: Result<ResponseHolderWrapper, UpstreamError>,
    pub results: Arc<[RequestResult]>,
    pub cache_status: CacheStatus,
}

impl UnaryResponse {
    #[must_use]
    pub fn error(error: UpstreamError) -> Self {
        Self { outcome: Err(error), results: Arc::from(Vec::new()), cache_status: CacheStatus::Miss }
    }
}

/// A live subscription relayed to the client.
#[derive(Debug)]
pub struct SubscriptionResponse {
    pub upstream_id: Arc<str>,
    pub subscription_id: String,
    /// Notifications until the subscription ends.
    pub events: mpsc::Receiver<JsonRpcResponse>,
}

/// What every processor returns.
#[derive(Debug)]
pub enum ProcessedResponse {
    Unary(UnaryResponse),
    Subscription(SubscriptionResponse),
}

impl ProcessedResponse {
    #[must_use]
    pub fn error(error: UpstreamError) -> Self {
        Self::Unary(UnaryResponse::error(error))
    }

    /// Attempt results, empty for subscriptions.
    #[must_use]
    pub fn results(&self) -> &[RequestResult] {
        match self {
            Self::Unary(unary) => &unary.results,
            Self::Subscription(_) => &[],
        }
    }
}

/// One message emitted by the flow.
#[derive(Debug, Clone)]
pub struct FlowResponse {
    /// JSON-RPC id of the originating request.
    pub id: Arc<Value>,
    /// Upstream that served it; `None` for failures before selection.
    pub upstream_id: Option<Arc<str>>,
    pub response: JsonRpcResponse,
}
