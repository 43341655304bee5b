//! Tests of runtime construction from configuration and of its lifecycle.

use crate::mock_infrastructure::{available, gateway_with, request, wait_until, MockReply, MockUpstream};
use gateway_core::{
    cache::CachePolicyConfig,
    chain::UpstreamEvent,
    config::{AppConfig, ChainConfig},
    runtime::{GatewayRuntime, RuntimeError},
    upstream::{RatingRegistry, StrategyKind, Upstream, UpstreamError},
};
use serde_json::json;
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

const GATEWAY_TOML: &str = r#"
[execution]
request_timeout_ms = 5000
method_ban_seconds = 60

[rating]
min_samples = 2
refresh_interval_seconds = 3600

[[cache.connectors]]
id = "memory"
max_items = 1000

[[cache.policies]]
id = "small"
connector_id = "memory"
max_size = "10KB"

[[chains]]
name = "polygon"
chain_id = 137
strategy = "rating"

[chains.retry]
max_attempts = 2

[[chains]]
name = "ethereum"
chain_id = 1
"#;

fn parse(toml_content: &str) -> AppConfig {
    toml::from_str(toml_content).expect("valid toml")
}

#[tokio::test]
async fn test_runtime_from_toml() {
    let config = parse(GATEWAY_TOML);
    let runtime = GatewayRuntime::builder().with_config(config).build().expect("valid config");

    let chains: Vec<String> = runtime.registry().chains().iter().map(ToString::to_string).collect();
    assert_eq!(chains, ["ethereum", "polygon"]);
    assert!(runtime.components().rating().is_some(), "polygon ranks by rating");
    assert_eq!(runtime.components().cache().policies().len(), 1);
    assert_eq!(runtime.config().chain("polygon").map(|c| c.retry.max_attempts), Some(2));

    let cancel = CancellationToken::new();
    let mut receiver = runtime.flow().execute("ethereum", vec![request("eth_chainId", json!([]))], &cancel);
    let response = receiver.recv().await.expect("local answer");
    assert_eq!(response.response.result, Some(json!("0x1")));
    runtime.shutdown().await;
}

#[tokio::test]
async fn test_invalid_configs_are_rejected() {
    let missing = GatewayRuntime::builder().build();
    assert!(matches!(missing, Err(RuntimeError::ConfigValidation(_))));

    let no_chains = GatewayRuntime::builder().with_config(AppConfig::default()).build();
    assert!(matches!(no_chains, Err(RuntimeError::ConfigValidation(ref m)) if m.contains("No chains")));

    let mut unknown_connector = AppConfig { chains: vec![ChainConfig::new("polygon", 137)], ..AppConfig::default() };
    unknown_connector.cache.policies.push(CachePolicyConfig::new("all", "redis"));
    let result = GatewayRuntime::builder().with_config(unknown_connector).build();
    assert!(matches!(result, Err(RuntimeError::ConfigValidation(ref m)) if m.contains("unknown connector")));

    let mut bad_size = parse(GATEWAY_TOML);
    bad_size.cache.policies[0].max_size = "ten".to_string();
    assert!(GatewayRuntime::builder().with_config(bad_size).build().is_err());
}

#[tokio::test]
async fn test_upstream_for_unknown_chain_is_rejected() {
    let config = AppConfig { chains: vec![ChainConfig::new("polygon", 137)], ..AppConfig::default() };
    let runtime = GatewayRuntime::builder().with_config(config).build().expect("valid config");

    let stray: Arc<dyn Upstream> = Arc::new(MockUpstream::new("a", "solana"));
    let result = runtime.registry().register_upstream(stray);
    assert!(matches!(result, Err(UpstreamError::UnknownChain(ref chain)) if chain == "solana"));
    assert!(runtime.registry().upstream("solana", "a").is_none());
    runtime.shutdown().await;
}

#[tokio::test]
async fn test_rating_moves_traffic_off_failing_upstream() {
    let mut config = parse(GATEWAY_TOML);
    config.chains.retain(|chain| chain.name == "polygon");
    let fixture = gateway_with(config, &[("a", 100), ("b", 100)]).await;
    assert_eq!(fixture.runtime.config().chains[0].strategy, StrategyKind::Rating);
    fixture.upstream("a").respond("eth_getBalance", MockReply::rpc_error(-32603, "internal error"));
    fixture.upstream("b").respond("eth_getBalance", MockReply::result(json!("0x2a")));

    // unrated upstreams rotate, so "a" leads half of these and fails over to "b"
    for block in 0..4u64 {
        let response = fixture.call(request("eth_getBalance", json!(["0xabc", format!("0x{block:x}")]))).await;
        assert_eq!(response.response.result, Some(json!("0x2a")));
    }
    assert_eq!(fixture.upstream("a").calls_for("eth_getBalance"), 2);

    let rating = Arc::clone(fixture.runtime.components().rating().expect("rating enabled"));
    rating.refresh();
    let ranked: Vec<String> =
        rating.sorted_upstreams("polygon", "eth_getBalance").iter().map(ToString::to_string).collect();
    assert_eq!(ranked, ["b", "a"]);

    for block in 0x10..0x14u64 {
        let response = fixture.call(request("eth_getBalance", json!(["0xabc", format!("0x{block:x}")]))).await;
        assert_eq!(response.upstream_id.as_deref(), Some("b"));
    }
    assert_eq!(fixture.upstream("a").calls_for("eth_getBalance"), 2, "the worse-rated upstream is not tried first");
    fixture.shutdown().await;
}

#[tokio::test]
async fn test_outer_shutdown_stops_supervisors() {
    let outer = CancellationToken::new();
    let config = AppConfig { chains: vec![ChainConfig::new("polygon", 137)], ..AppConfig::default() };
    let runtime = GatewayRuntime::builder().with_config(config).with_shutdown(outer.clone()).build().expect("valid config");
    let supervisor = runtime.registry().supervisor("polygon").expect("supervisor");
    assert!(supervisor.try_publish(UpstreamEvent::state_update("a", available("a", 1))));

    let token = runtime.shutdown_token();
    let waiting = tokio::spawn(runtime.wait_for_shutdown());
    outer.cancel();
    tokio::time::timeout(Duration::from_secs(1), waiting).await.expect("runtime stopped").expect("task joined");

    assert!(token.is_cancelled());
    wait_until("supervisor stopped", || !supervisor.try_publish(UpstreamEvent::remove("a"))).await;
}
