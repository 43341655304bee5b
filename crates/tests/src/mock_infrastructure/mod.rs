//! Mock Infrastructure for Testing the Gateway Core
//!
//! Reusable in-process stand-ins for the pieces the core talks to, so tests run without
//! network connections.
//!
//! ## Components
//!
//! - `MockUpstream`: scripted [`Upstream`](gateway_core::upstream::Upstream) that records
//!   every call and when it started
//! - `RecordingConnector`: in-memory cache connector counting lookups and stores
//! - Test helpers for upstream states, requests and a one-chain gateway fixture
//!
//! ## Usage
//!
//! ```ignore
//! use tests::mock_infrastructure::{gateway, MockReply};
//!
//! let fixture = gateway(ChainConfig::new("polygon", 137), &[("a", 100)]).await;
//! fixture.upstream("a").respond("eth_call", MockReply::result(json!("0x1")));
//! ```

pub mod cache_mock;
pub mod upstream_mock;

pub use cache_mock::RecordingConnector;
pub use test_helpers::*;
pub use upstream_mock::{MockReply, MockUpstream};
