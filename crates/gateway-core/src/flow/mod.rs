//! Request execution: classification, processors, hooks and the batch flow.
//!
//! ```text
//!                     ┌──────────────────────── ExecutionFlow ────────────────────────┐
//! requests ──► task ──┤ RequestKind::classify(MethodSpec)                            │
//!                     │   Local        ──► LocalRequestProcessor                     │
//!                     │   Subscription ──► SubscriptionRequestProcessor ──► relay    │
//!                     │   Sticky(role) ──► StickyRequestProcessor ─┐                 │
//!                     │   Integrity    ──► IntegrityRequestProcessor ┼► Unary        │
//!                     │   Unary        ──────────────────────────────┘  cache/retry  │
//!                     │                                                 /hedge       │
//!                     │ ProcessedResponse ──► ResultHooks ──► FlowResponse channel   │
//!                     └──────────────────────────────────────────────────────────────┘
//! ```

pub mod context;
pub mod execution;
pub mod hooks;
pub mod methods;
pub mod policies;
pub mod processors;
pub mod request;

pub use context::FlowContext;
pub use execution::ExecutionFlow;
pub use hooks::{DimensionHook, MethodBanHook, ResultHook};
pub use methods::{MethodRegistry, MethodSpec, RequestKind, StaticMethodRegistry, StickyRole};
pub use processors::{
    IntegrityRequestProcessor, LocalRequestProcessor, RequestProcessors, StickyRequestProcessor,
    SubscriptionRegistry, SubscriptionRequestProcessor, UnaryRequestProcessor,
};
pub use request::{
    AttemptJournal, AttemptOutcome, FlowResponse, ProcessedResponse, RequestHolder, RequestResult, ResponseHolderWrapper,
    SubscriptionResponse, UnaryResponse, CACHE_UPSTREAM, LOCAL_UPSTREAM,
};
