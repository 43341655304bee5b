//! Request processors, one per [`RequestKind`].
//!
//! Every processor returns a [`ProcessedResponse`], so the flow's hooks and response
//! channel do not depend on which processor ran.

pub mod integrity;
pub mod local;
pub mod sticky;
pub mod subscription;
pub mod unary;


pub use integrity::IntegrityRequestProcessor;
pub use local::LocalRequestProcessor;
pub use sticky::StickyRequestProcessor;
pub use subscription::{SubscriptionRegistry, SubscriptionRequestProcessor};
pub use unary::UnaryRequestProcessor;

use super::{
    context::FlowContext,
    methods::RequestKind,
    request::{ProcessedResponse, RequestHolder},
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// The fixed set of processors, dispatched by request kind.
#[derive(Clone)]
pub struct RequestProcessors {
    unary: UnaryRequestProcessor,
    sticky: StickyRequestProcessor,
    integrity: IntegrityRequestProcessor,
    subscription: SubscriptionRequestProcessor,
    local: LocalRequestProcessor,
}

impl RequestProcessors {
    #[must_use]
    pub fn new(ctx: &Arc<FlowContext>) -> Self {
        let unary = UnaryRequestProcessor::new(Arc::clone(ctx));
        Self {
            sticky: StickyRequestProcessor::new(unary.clone()),
            integrity: IntegrityRequestProcessor::new(Arc::clone(ctx), unary.clone()),
            subscription: SubscriptionRequestProcessor::new(Arc::clone(ctx)),
            local: LocalRequestProcessor::new(Arc::clone(ctx)),
            unary,
        }
    }

    pub async fn process(
        &self,
        kind: RequestKind,
        holder: &RequestHolder,
        cancel: &CancellationToken,
    ) -> ProcessedResponse {
        match kind {
            RequestKind::Local => self.local.process(holder),
            RequestKind::Subscription => self.subscription.process(holder, cancel).await,
            RequestKind::Sticky(role) => self.sticky.process(holder, role, cancel).await,
            RequestKind::Integrity => self.integrity.process(holder, cancel).await,
            RequestKind::Unary => self.unary.process(holder, cancel).await,
        }
    }
}
