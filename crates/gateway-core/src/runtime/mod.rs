//! Runtime assembly and lifecycle.
//!
//! Builds every core component from an [`AppConfig`](crate::config::AppConfig), starts the
//! background tasks (chain supervisors, cache sweepers, rating refresh) and stops them
//! together on shutdown. Transports are not part of the runtime: the embedding process
//! registers its [`Upstream`](crate::upstream::Upstream) handles on the chain registry and
//! publishes their state.
//!
//! # Example
//!
//! ```no_run
//! use gateway_core::{config::AppConfig, runtime::GatewayRuntime};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AppConfig::load()?;
//!     let runtime = GatewayRuntime::builder().with_config(config).build()?;
//!
//!     // runtime.registry().register_upstream(...) for every transport
//!
//!     let request = gateway_core::types::JsonRpcRequest::new("eth_blockNumber", None, serde_json::json!(1));
//!     let mut responses = runtime.flow().execute("polygon", vec![request], &CancellationToken::new());
//!     while let Some(response) = responses.recv().await {
//!         println!("{:?}", response.response);
//!     }
//!
//!     runtime.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod components;
pub mod lifecycle;

pub use builder::{GatewayRuntimeBuilder, RuntimeError};
pub use components::GatewayComponents;
pub use lifecycle::GatewayRuntime;
