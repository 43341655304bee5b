//! Integration tests for cache policies behind the cache processor.
//!
//! These tests verify:
//! - Size ceilings and the empty-response rule decide what is stored
//! - Policies whose chain or method does not match are never queried
//! - Overlapping policies are raced on lookup and all written on store
//! - Finalized-only policies keep blocks at or below the finalized height

use crate::mock_infrastructure::{request, RecordingConnector};
use ahash::AHashMap;
use gateway_core::cache::{CacheConnector, CachePolicy, CachePolicyConfig, CacheProcessor, FinalizationType};
use serde_json::{json, Value};
use std::{sync::Arc, time::Duration};

struct Setup {
    processor: CacheProcessor,
    connectors: Vec<Arc<RecordingConnector>>,
}

/// One recording connector per policy, named after the policy.
fn setup(policies: Vec<CachePolicyConfig>) -> Setup {
    let mut map: AHashMap<String, Arc<dyn CacheConnector>> = AHashMap::new();
    let mut connectors = Vec::new();
    let mut built = Vec::new();
    for mut config in policies {
        let connector = Arc::new(RecordingConnector::new(&config.id));
        map.insert(config.id.clone(), Arc::clone(&connector) as Arc<dyn CacheConnector>);
        config.connector_id = config.id.clone();
        built.push(CachePolicy::from_config(&config, &map).unwrap());
        connectors.push(connector);
    }
    Setup { processor: CacheProcessor::new(built, Duration::from_millis(200)), connectors }
}

fn policy(id: &str, configure: impl FnOnce(&mut CachePolicyConfig)) -> CachePolicyConfig {
    let mut config = CachePolicyConfig::new(id, id);
    configure(&mut config);
    config
}

async fn store(processor: &CacheProcessor, method: &str, result: &Value) -> bool {
    let req = request(method, json!(["0xabc", "0x10"]));
    match processor.store("polygon", &req, result, None, None) {
        Some(handle) => {
            handle.await.unwrap();
            true
        }
        None => false,
    }
}

#[tokio::test]
async fn test_ten_kilobyte_policy() {
    let Setup { processor, connectors } = setup(vec![policy("small", |c| c.max_size = "10KB".to_string())]);

    let nine_kb = Value::String("a".repeat(9 * 1024));
    assert!(store(&processor, "eth_call", &nine_kb).await, "9KB fits under 10KB");

    let eleven_kb = Value::String("a".repeat(11 * 1024));
    assert!(!store(&processor, "eth_getBalance", &eleven_kb).await, "over 10KB is rejected");

    for empty in [json!("0x"), Value::Null, json!({}), json!([])] {
        assert!(!store(&processor, "eth_getCode", &empty).await, "{empty} is empty and cache_empty is off");
    }

    assert_eq!(connectors[0].stores(), 1);
    assert_eq!(connectors[0].len(), 1);
}

#[tokio::test]
async fn test_cache_empty_allows_empty_results() {
    let Setup { processor, connectors } = setup(vec![policy("lenient", |c| c.cache_empty = true)]);
    assert!(store(&processor, "eth_getCode", &json!("0x")).await);

    let req = request("eth_getCode", json!(["0xabc", "0x10"]));
    assert_eq!(processor.receive("polygon", &req).await, Some(json!("0x")));
    assert_eq!(connectors[0].receives(), 1);
}

#[tokio::test]
async fn test_non_matching_policies_never_queried() {
    let Setup { processor, connectors } = setup(vec![
        policy("ethereum-only", |c| c.chain = "ethereum".to_string()),
        policy("logs-only", |c| c.method = "eth_getLogs".to_string()),
        policy("polygon-getters", |c| {
            c.chain = "polygon".to_string();
            c.method = "eth_get*".to_string();
        }),
    ]);

    let req = request("eth_getBalance", json!(["0xabc", "latest"]));
    assert_eq!(processor.receive("polygon", &req).await, None);
    assert!(store(&processor, "eth_getBalance", &json!("0x1")).await);

    assert_eq!(connectors[0].receives() + connectors[0].stores(), 0);
    assert_eq!(connectors[1].receives() + connectors[1].stores(), 0);
    assert_eq!(connectors[2].receives(), 1);
    assert_eq!(connectors[2].stores(), 1);

    let eth_call = request("eth_call", json!([{}, "latest"]));
    assert_eq!(processor.receive("polygon", &eth_call).await, None);
    assert_eq!(connectors[2].receives(), 1, "eth_call does not match eth_get*");
}

#[tokio::test]
async fn test_overlapping_policies_store_everywhere_and_race_lookups() {
    let Setup { processor, connectors } = setup(vec![policy("first", |_| {}), policy("second", |_| {})]);

    assert!(store(&processor, "eth_getBalance", &json!("0x2a")).await);
    assert_eq!(connectors[0].stores(), 1);
    assert_eq!(connectors[1].stores(), 1);

    let req = request("eth_getBalance", json!(["0xabc", "0x10"]));
    assert_eq!(processor.receive("polygon", &req).await, Some(json!("0x2a")));
    assert!(connectors[0].receives() + connectors[1].receives() >= 1);
}

#[tokio::test]
async fn test_hit_in_one_policy_is_enough() {
    let Setup { processor, connectors } = setup(vec![policy("cold", |_| {}), policy("warm", |_| {})]);
    let req = request("eth_getBalance", json!(["0xabc", "0x10"]));
    connectors[1].seed(&CacheProcessor::cache_key("polygon", &req), b"\"0x7\"");

    assert_eq!(processor.receive("polygon", &req).await, Some(json!("0x7")));
    assert_eq!(processor.receive("ethereum", &req).await, None, "keys are scoped by chain");
}

#[tokio::test]
async fn test_undecodable_entry_is_a_miss() {
    let Setup { processor, connectors } = setup(vec![policy("broken", |_| {})]);
    let req = request("eth_getBalance", json!(["0xabc", "0x10"]));
    connectors[0].seed(&CacheProcessor::cache_key("polygon", &req), b"{not json");

    assert_eq!(processor.receive("polygon", &req).await, None);
}

#[tokio::test]
async fn test_finalized_policy() {
    let Setup { processor, connectors } =
        setup(vec![policy("final", |c| c.finalization_type = FinalizationType::Finalized)]);
    let block = |tag: &str| request("eth_getBlockByNumber", json!([tag, false]));
    let result = json!({ "number": "0x64" });

    let below = block("0x64");
    let handle = processor.store("polygon", &below, &result, below.param(0), Some(100));
    handle.expect("block at the finalized height is stored").await.unwrap();

    let above = block("0x65");
    assert!(processor.store("polygon", &above, &result, above.param(0), Some(100)).is_none());

    let latest = block("latest");
    assert!(processor.store("polygon", &latest, &result, latest.param(0), Some(100)).is_none());

    assert!(processor.store("polygon", &below, &result, below.param(0), None).is_none(), "unknown finality");
    assert_eq!(connectors[0].stores(), 1);
}

#[tokio::test]
async fn test_disabled_processor() {
    let processor = CacheProcessor::disabled();
    let req = request("eth_getBalance", json!(["0xabc", "0x10"]));
    assert!(processor.store("polygon", &req, &json!("0x1"), None, None).is_none());
    assert_eq!(processor.receive("polygon", &req).await, None);
}
