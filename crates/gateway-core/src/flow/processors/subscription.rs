//! Subscription relay.
//!
//! ```text
//! select ws-capable upstream ──► subscribe ──► first message = subscription id
//!                                                   │
//!                     registry[id] = cancel token ◄─┘
//!                                                   │
//!  relay task: upstream events ──► {"subscription", "result"} ──► client channel
//!    ends on: parent cancel | unsubscribe | upstream close | client gone
//! ```

use crate::{
    flow::{
        context::FlowContext,
        request::{ProcessedResponse, RequestHolder, SubscriptionResponse},
    },
    metrics::GatewayMetrics,
    types::JsonRpcResponse,
    upstream::{SelectionRequest, UpstreamError, UpstreamSubscription},
};
use dashmap::DashMap;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const RELAY_CAPACITY: usize = 64;

/// Live subscriptions by id, for unsubscribe correlation.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    active: DashMap<String, CancellationToken>,
}

impl SubscriptionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the id is already registered.
    pub fn register(&self, subscription_id: &str, cancel: CancellationToken) -> bool {
        let inserted = match self.active.entry(subscription_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(cancel);
                true
            }
        };
        GatewayMetrics::record_active_subscriptions(self.active.len());
        inserted
    }

    /// Stops a subscription. Returns whether it was active.
    pub fn cancel(&self, subscription_id: &str) -> bool {
        match self.active.remove(subscription_id) {
            Some((_, cancel)) => {
                cancel.cancel();
                GatewayMetrics::record_active_subscriptions(self.active.len());
                true
            }
            None => false,
        }
    }

    fn remove(&self, subscription_id: &str) {
        if self.active.remove(subscription_id).is_some() {
            GatewayMetrics::record_active_subscriptions(self.active.len());
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.active.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

#[derive(Clone)]
pub struct SubscriptionRequestProcessor {
    ctx: Arc<FlowContext>,
}

impl SubscriptionRequestProcessor {
    #[must_use]
    pub fn new(ctx: Arc<FlowContext>) -> Self {
        Self { ctx }
    }

    pub async fn process(&self, holder: &RequestHolder, cancel: &CancellationToken) -> ProcessedResponse {
        match self.open(holder, cancel).await {
            Ok(response) => ProcessedResponse::Subscription(response),
            Err(error) => ProcessedResponse::error(error),
        }
    }

    async fn open(&self, holder: &RequestHolder, cancel: &CancellationToken) -> Result<SubscriptionResponse, UpstreamError> {
        let (config, supervisor) = self.ctx.resolve_chain(&holder.chain)?;
        let selection = SelectionRequest { subscription: true, ..SelectionRequest::new(holder.method()) };
        let strategy = self.ctx.strategies.create(config.strategy, supervisor, &selection);

        // every candidate is tried once; a selection failure after a real failure reports
        // the real one
        let mut last_failure = None;
        loop {
            let upstream_id = match strategy.select_upstream() {
                Ok(id) => id,
                Err(error) => return Err(last_failure.unwrap_or(error)),
            };
            let Some(upstream) = self.ctx.registry.upstream(&holder.chain, &upstream_id) else {
                continue;
            };

            let relay_cancel = cancel.child_token();
            let opened = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(UpstreamError::Cancelled),
                opened = upstream.subscribe(&holder.request, &relay_cancel) => opened,
            };
            let result = match opened {
                Ok(subscription) => self.relay(holder, Arc::clone(&upstream_id), subscription, relay_cancel).await,
                Err(error) => Err(error),
            };
            match result {
                Ok(response) => return Ok(response),
                Err(UpstreamError::Cancelled) => return Err(UpstreamError::Cancelled),
                Err(error) => {
                    warn!(
                        chain = %holder.chain,
                        upstream = %upstream_id,
                        method = %holder.method(),
                        error = %error,
                        "subscription failed on upstream"
                    );
                    last_failure = Some(error);
                }
            }
        }
    }

    /// Waits for the subscription id, then relays events until the subscription ends.
    async fn relay(
        &self,
        holder: &RequestHolder,
        upstream_id: Arc<str>,
        mut subscription: UpstreamSubscription,
        cancel: CancellationToken,
    ) -> Result<SubscriptionResponse, UpstreamError> {
        let first = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(UpstreamError::Cancelled),
            first = subscription.events.recv() => first,
        };
        let subscription_id = match first {
            Some(Ok(Value::String(id))) => id,
            Some(Ok(other)) => other.to_string(),
            Some(Err(error)) => return Err(error),
            None => return Err(UpstreamError::SubscriptionClosed),
        };

        if !self.ctx.subscriptions.register(&subscription_id, cancel.clone()) {
            cancel.cancel();
            return Err(UpstreamError::IncorrectResponseBody(format!(
                "duplicate subscription id {subscription_id}"
            )));
        }
        info!(
            chain = %holder.chain,
            upstream = %upstream_id,
            subscription = %subscription_id,
            "subscription opened"
        );

        let (sender, events) = mpsc::channel(RELAY_CAPACITY);
        let registry = Arc::clone(&self.ctx.subscriptions);
        let request_id = Arc::clone(&holder.request.id);
        let id = subscription_id.clone();
        let upstream = Arc::clone(&upstream_id);

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    event = subscription.events.recv() => event,
                };
                match event {
                    Some(Ok(result)) => {
                        let notification = JsonRpcResponse::success(
                            json!({ "subscription": id, "result": result }),
                            Arc::clone(&request_id),
                        );
                        if sender.send(notification).await.is_err() {
                            debug!(subscription = %id, "client left, closing subscription");
                            break;
                        }
                    }
                    Some(Err(error)) => {
                        warn!(upstream = %upstream, subscription = %id, error = %error, "subscription stream failed");
                        break;
                    }
                    None => break,
                }
            }
            cancel.cancel();
            registry.remove(&id);
            info!(upstream = %upstream, subscription = %id, "subscription closed");
        });

        Ok(SubscriptionResponse { upstream_id, subscription_id, events })
    }
}
